//! Presentation boundary.
//!
//! The pipeline drives rendering exclusively through this trait; the crate
//! ships no DOM or widget code. Implementations get full messages for
//! `append_bubble` and the complete accumulated text for `update_bubble`
//! (in-place update of a streaming reply, no re-render of prior content).

use crate::types::Role;

/// Handle to one rendered message bubble.
pub type BubbleId = u64;

pub trait ChatSurface: Send {
    /// Render a new message bubble and return its handle.
    fn append_bubble(&mut self, role: Role, content: &str) -> BubbleId;

    /// Replace a bubble's text in place (streaming updates).
    fn update_bubble(&mut self, id: BubbleId, content: &str);

    /// Remove a bubble (typing indicators, transient retry notices).
    fn remove_bubble(&mut self, id: BubbleId);

    /// Show the transient typing indicator; removed via [`remove_bubble`].
    ///
    /// [`remove_bubble`]: ChatSurface::remove_bubble
    fn show_typing(&mut self) -> BubbleId;

    /// Enable or disable the input affordances while a send is in flight.
    fn set_input_enabled(&mut self, enabled: bool);

    /// Render the suggested-questions block under the transcript.
    fn show_suggestions(&mut self, title: &str, questions: &[&str]);

    /// Keep the latest message visible.
    fn scroll_to_latest(&mut self);

    /// Drop everything rendered so far (conversation cleared).
    fn clear(&mut self);
}
