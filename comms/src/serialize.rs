/// Turns a message into the bytes of a single frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the payload into `buf`.
    ///
    /// # Returns
    /// An optional borrowed tail that is written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
