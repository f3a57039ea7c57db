//! Text extraction capability for corpus items.
//!
//! Items entering the coarse filter must state how they are rendered to
//! text by implementing [`EmbedText`]. The accessor is a single
//! deterministic method; an item without the capability fails to compile
//! rather than being silently paved over at runtime.

/// Capability for items that can produce a textual representation
/// suitable for embedding.
pub trait EmbedText {
    /// The text this item should be embedded as.
    ///
    /// Blank or whitespace-only output is mapped to the empty string at
    /// encode time rather than rejected, so a single degenerate item
    /// never aborts a corpus pass.
    fn embed_text(&self) -> String;
}

impl EmbedText for str {
    fn embed_text(&self) -> String {
        self.to_string()
    }
}

impl EmbedText for String {
    fn embed_text(&self) -> String {
        self.clone()
    }
}

impl<T: EmbedText + ?Sized> EmbedText for &T {
    fn embed_text(&self) -> String {
        (**self).embed_text()
    }
}
