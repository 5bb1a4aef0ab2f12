/// Splits text on whitespace and regroups it into chunks of at most `chunk_size` words.
///
/// Chunks are joined with single spaces, so original line breaks are not preserved.
/// A `chunk_size` of zero is treated as one word per chunk.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(chunk_size.max(1))
        .map(|group| group.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_words_in_order() {
        let chunks = chunk_text("a b c d e", 2);
        assert_eq!(chunks, vec!["a b", "c d", "e"]);
    }

    #[test]
    fn collapses_whitespace_runs() {
        let chunks = chunk_text("  one\n\ntwo\tthree  ", 10);
        assert_eq!(chunks, vec!["one two three"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   \n", 5).is_empty());
    }

    #[test]
    fn every_chunk_but_the_last_is_full() {
        for size in [1, 2, 3, 7, 10] {
            for count in [1_usize, 2, 6, 7, 9, 10, 11, 23, 50] {
                let text = (0..count)
                    .map(|i| format!("w{i}"))
                    .collect::<Vec<_>>()
                    .join(if count % 2 == 0 { "  " } else { "\n" });
                let chunks = chunk_text(&text, size);

                assert_eq!(chunks.len(), count.div_ceil(size), "size {size}, words {count}");
                let (last, full) = chunks.split_last().expect("at least one chunk");
                for chunk in full {
                    assert_eq!(chunk.split(' ').count(), size);
                }
                let last_len = last.split(' ').count();
                assert!((1..=size).contains(&last_len));

                let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
                assert_eq!(chunks.join(" "), normalized);
                assert_eq!(chunk_text(&chunks.join(" "), size), chunks);
            }
        }
    }

    #[test]
    fn zero_size_degrades_to_single_words() {
        assert_eq!(chunk_text("x y", 0), vec!["x", "y"]);
    }
}
