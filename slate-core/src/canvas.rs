use crate::path::EncodedPath;

/// Rendering surface a board can be painted on.
///
/// Implementations own all pixel work; boards only hand over their ordered
/// path list after a clear.
pub trait Canvas {
    fn clear(&mut self);
    fn draw(&mut self, paths: &[EncodedPath]);
}
