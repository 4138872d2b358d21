//! Property tests for the recursive splitter

use knowbase::ingest::{chunk, Document, TextSplitter};
use proptest::prelude::*;

const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

fn splitter(size: usize, overlap: usize) -> TextSplitter {
    TextSplitter::new(
        size,
        overlap,
        SEPARATORS.iter().map(|s| s.to_string()).collect(),
    )
    .unwrap()
}

/// Prose-like text: words, sentence ends, line and paragraph breaks, some multibyte
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            4 => "[a-zé]{1,12}",
            3 => Just(" ".to_string()),
            1 => Just(". ".to_string()),
            1 => Just("\n".to_string()),
            1 => Just("\n\n".to_string()),
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

/// (chunk_size, overlap) with overlap < chunk_size
fn arb_sizes() -> impl Strategy<Value = (usize, usize)> {
    (2usize..80).prop_flat_map(|size| (Just(size), 0..size))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunking_is_deterministic(text in arb_text(), (size, overlap) in arb_sizes()) {
        let doc = Document::new("doc.txt", text);
        let first = splitter(size, overlap).chunk(&doc);
        let second = splitter(size, overlap).chunk(&doc);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn chunks_cover_text_in_order(text in arb_text(), (size, overlap) in arb_sizes()) {
        let doc = Document::new("doc.txt", text.clone());
        let chunks = splitter(size, overlap).chunk(&doc);
        let chars: Vec<char> = text.chars().collect();

        let mut rebuilt = String::new();
        let mut covered = 0;
        for c in &chunks {
            let expected: String = chars[c.offset..c.offset + c.length].iter().collect();
            prop_assert_eq!(&c.text, &expected);
            prop_assert!(c.offset <= covered);
            rebuilt.extend(chars[covered.max(c.offset)..c.end()].iter());
            covered = covered.max(c.end());
        }

        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunks_respect_size_and_overlap(text in arb_text(), (size, overlap) in arb_sizes()) {
        let doc = Document::new("doc.txt", text);
        let chunks = splitter(size, overlap).chunk(&doc);

        for c in &chunks {
            prop_assert!(c.length <= size, "chunk of {} chars exceeds {}", c.length, size);
        }
        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[0].end() - pair[1].offset, overlap);
            prop_assert!(pair[1].offset > pair[0].offset);
        }
    }

    #[test]
    fn short_documents_are_one_chunk(text in "[a-z ]{1,40}") {
        let doc = Document::new("doc.txt", text.clone());
        let chunks = splitter(40, 10).chunk(&doc);
        prop_assert_eq!(chunks.len(), 1);
        prop_assert_eq!(&chunks[0].text, &text);
    }
}

#[test]
fn empty_document_has_no_chunks() {
    let doc = Document::new("empty.txt", "");
    assert!(chunk(&doc, 1000, 200, &SEPARATORS).unwrap().is_empty());
}

#[test]
fn cats_example_overlaps_by_five() {
    let doc = Document::new("cats.txt", "Cats are mammals. Cats purr.");
    let chunks = chunk(&doc, 20, 5, &SEPARATORS).unwrap();

    assert!(chunks.len() >= 2);
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
    for pair in chunks.windows(2) {
        let tail: String = pair[0].text.chars().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect();
        let head: String = pair[1].text.chars().take(5).collect();
        assert_eq!(tail, head);
    }
}
