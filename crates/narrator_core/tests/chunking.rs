use std::sync::Once;

use narrator_core::{estimate_token_count, split_text_into_chunks, TextChunk};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

/// Collapses all whitespace runs so chunk output can be compared against the
/// source text.
fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reassembles the chunk sequence the way it came apart: each chunk knows
/// the separator that preceded it.
fn rejoined(chunks: &[TextChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("{}{}", chunk.separator, chunk.text))
        .collect()
}

#[test]
fn estimator_takes_the_larger_of_char_and_word_heuristics() {
    init_logging();
    assert_eq!(estimate_token_count(""), 0);
    // One word: 5 chars / 4 = 1.25 vs 1 * 1.3 = 1.3, ceil -> 2.
    assert_eq!(estimate_token_count("hello"), 2);
    // Two words: 11 chars / 4 = 2.75 wins over 2.6, ceil -> 3.
    assert_eq!(estimate_token_count("hello world"), 3);
    // Many short words: the word branch dominates. 19 chars vs 10 words.
    assert_eq!(estimate_token_count("a a a a a a a a a a"), 13);
    // One long unbroken run: the char branch dominates.
    let run = "x".repeat(400);
    assert_eq!(estimate_token_count(&run), 100);
}

#[test]
fn empty_and_whitespace_input_yield_no_chunks() {
    init_logging();
    assert!(split_text_into_chunks("", 100).is_empty());
    assert!(split_text_into_chunks("   \n\n  \t \n ", 100).is_empty());
}

#[test]
fn single_paragraph_under_budget_is_one_chunk() {
    init_logging();
    let text = "A short paragraph that fits easily.";
    let chunks = split_text_into_chunks(text, 100);

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].index, 0);
    assert_eq!(chunks[0].text, text);
    assert_eq!(chunks[0].separator, "");
    assert_eq!(chunks[0].estimated_tokens, estimate_token_count(text));
}

#[test]
fn paragraphs_pack_greedily_within_budget() {
    init_logging();
    // Each paragraph estimates to 4 tokens (14 chars, 3 words).
    let paragraph = "aaaa bbbb cccc";
    assert_eq!(estimate_token_count(paragraph), 4);
    let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");

    // Budget 8 holds exactly two paragraphs per chunk.
    let chunks = split_text_into_chunks(&text, 8);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, format!("{paragraph}\n\n{paragraph}"));
    assert_eq!(chunks[0].estimated_tokens, 8);
    assert_eq!(chunks[0].separator, "");
    assert_eq!(chunks[1].text, paragraph);
    assert_eq!(chunks[1].index, 1);
    assert_eq!(chunks[1].separator, "\n\n");
    assert_eq!(rejoined(&chunks), text);
}

#[test]
fn oversized_paragraph_splits_at_sentence_boundaries() {
    init_logging();
    let text = "The first sentence of a very long paragraph sits here. \
                The second sentence follows it without a break! \
                Does the third sentence end with a question mark?";
    let total = estimate_token_count(text);
    let budget = total / 2;

    let chunks = split_text_into_chunks(text, budget);
    assert!(chunks.len() > 1, "expected a split, got {chunks:?}");
    for chunk in &chunks {
        assert!(chunk.estimated_tokens <= budget);
        // Sentence splits end on their terminal punctuation.
        let last = chunk.text.chars().last().expect("non-empty chunk");
        assert!(matches!(last, '.' | '!' | '?'));
    }
    assert_eq!(normalized(&rejoined(&chunks)), normalized(text));
}

#[test]
fn run_on_text_falls_back_to_character_slices() {
    init_logging();
    // 50 chars, no sentence punctuation anywhere.
    let text = "x".repeat(50);
    // Budget 5 -> slices of at most 20 chars.
    let chunks = split_text_into_chunks(&text, 5);

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text.chars().count(), 20);
    assert_eq!(chunks[1].text.chars().count(), 20);
    assert_eq!(chunks[2].text.chars().count(), 10);
    // Slice boundaries carry no separator, so reassembly is exact.
    assert_eq!(chunks[1].separator, "");
    assert_eq!(chunks[2].separator, "");
    assert_eq!(rejoined(&chunks), text);
}

#[test]
fn mid_word_slice_boundaries_reassemble_exactly() {
    init_logging();
    let text = "Heading paragraph with some length to it.";
    // Forces slicing: the single sentence is over budget at 5 tokens.
    let chunks = split_text_into_chunks(text, 5);

    assert!(chunks.len() > 1);
    // No whitespace is invented where a word was cut.
    assert_eq!(rejoined(&chunks), text);
}

#[test]
fn guardrail_slices_may_exceed_budget_but_are_never_dropped() {
    init_logging();
    // Short words make the word-count branch overshoot the char-based slice
    // sizing, so slices estimate above the budget. They must still all be
    // emitted.
    let text = "ab ".repeat(40);
    let chunks = split_text_into_chunks(text.trim(), 5);

    assert!(!chunks.is_empty());
    assert!(chunks.iter().any(|chunk| chunk.estimated_tokens > 5));
    assert_eq!(rejoined(&chunks), text.trim());
}

#[test]
fn rejoined_chunks_reproduce_input_modulo_whitespace() {
    init_logging();
    let text = "Heading paragraph with some length to it.\n\n\
                Second paragraph. It has two sentences!\n \n\
                Third paragraph after a whitespace-only line.\n\n\n\
                Fourth paragraph ends without punctuation";
    for budget in [5, 10, 20, 100] {
        let chunks = split_text_into_chunks(text, budget);
        assert_eq!(
            normalized(&rejoined(&chunks)),
            normalized(text),
            "content lost at budget {budget}"
        );
        // Indexes are dense and ordered.
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, position);
        }
    }
}

#[test]
fn quoted_sentence_endings_stay_attached() {
    init_logging();
    let text = "\"Is that so?\" she asked. The reply never came.";
    let budget = estimate_token_count(text) / 2;
    let chunks = split_text_into_chunks(text, budget);

    assert_eq!(normalized(&rejoined(&chunks)), normalized(text));
    // The first chunk keeps the closing quote with its question.
    assert!(chunks[0].text.ends_with('"'));
}
