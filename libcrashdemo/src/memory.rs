use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::borrow::Cow;
use std::io::Write;
use std::marker::PhantomData;
use std::ptr::NonNull;
/////////////////////////////////////////
use anyhow::{Context, Result, anyhow};
/////////////////////////////////////////
use crate::fault::Fault;
/////////////////////////////////////////

pub const BUFFER_SIZE: usize = 100;
pub const BUFFER_MESSAGE: &str = "Hello, GDB!";

/// A raw, fixed-size heap allocation. Unlike a `Vec` the allocation is exactly `len` bytes,
/// so "one past the end" really is outside of what the allocator handed out.
pub struct HeapBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl HeapBuffer {
    pub fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(anyhow!("Cannot allocate an empty heap buffer"));
        }
        let layout = Layout::array::<u8>(len).context("Invalid heap buffer layout")?;
        // Safety: the layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr =
            NonNull::new(ptr).ok_or_else(|| anyhow!("Failed to allocate {} bytes", len))?;
        Ok(HeapBuffer { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: `ptr` points to `len` initialized (zeroed) bytes owned by `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Copies `text` followed by a NUL terminator to the start of the buffer.
    /// Returns the number of bytes copied, not counting the terminator.
    pub fn copy_c_str(&mut self, text: &str) -> Result<usize> {
        let bytes = text.as_bytes();
        if bytes.len() + 1 > self.len {
            return Err(anyhow!(
                "String of {} bytes does not fit in a buffer of {} bytes",
                bytes.len(),
                self.len
            ));
        }
        // Safety: bounds checked above, source and destination cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr(), bytes.len());
            self.ptr.as_ptr().add(bytes.len()).write(0);
        }
        Ok(bytes.len())
    }

    /// The buffer contents up to the first NUL byte.
    pub fn c_str(&self) -> Cow<'_, str> {
        let contents = self.as_slice();
        let end = contents
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(contents.len());
        String::from_utf8_lossy(&contents[..end])
    }

    /// The address directly after the last byte of the allocation.
    pub fn one_past_end(&mut self) -> OverflowTarget<'_> {
        OverflowTarget {
            base: self.ptr,
            offset: self.len,
            _buffer: PhantomData,
        }
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        // Safety: allocated in `allocate` with the same layout.
        unsafe {
            dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.len, 1),
            )
        };
    }
}

/// An out-of-bounds location relative to a live [`HeapBuffer`]. Borrowing the buffer keeps
/// the allocation alive for as long as the target can still be written to.
#[derive(Debug)]
pub struct OverflowTarget<'a> {
    base: NonNull<u8>,
    offset: usize,
    _buffer: PhantomData<&'a mut HeapBuffer>,
}

impl OverflowTarget<'_> {
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn address(&self) -> usize {
        self.base_address().wrapping_add(self.offset)
    }
}

/// Everything the demo keeps alive between operations.
#[derive(Default)]
pub struct DemoState {
    pub buffer: Option<HeapBuffer>,
    pub counter: usize,
}

impl DemoState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Allocates the demo buffer, fills it with [`BUFFER_MESSAGE`] and prints it.
/// The returned fault is armed to write one byte past the end of the buffer, which now lives in
/// `state`. `state.counter` records how many bytes were copied.
#[inline(never)]
pub fn memory_operation<'a, W: Write>(
    state: &'a mut DemoState,
    out: &mut W,
) -> Result<Fault<'a>> {
    let mut buffer = HeapBuffer::allocate(BUFFER_SIZE)?;
    state.counter = buffer.copy_c_str(BUFFER_MESSAGE)?;
    writeln!(out, "Buffer content: {}", buffer.c_str())
        .context("Failed to write buffer content")?;
    let buffer = state.buffer.insert(buffer);
    Ok(Fault::HeapOverflow(buffer.one_past_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zero_bytes() {
        assert!(HeapBuffer::allocate(0).is_err());
    }

    #[test]
    fn test_copy_c_str() {
        let mut buffer = HeapBuffer::allocate(16).expect("Failed to allocate");
        assert_eq!(buffer.copy_c_str("abc").unwrap(), 3);
        assert_eq!(buffer.c_str(), "abc");
        assert_eq!(&buffer.as_slice()[..4], b"abc\0");
    }

    #[test]
    fn test_copy_c_str_needs_room_for_terminator() {
        let mut buffer = HeapBuffer::allocate(3).expect("Failed to allocate");
        assert!(buffer.copy_c_str("abc").is_err());
        assert_eq!(buffer.copy_c_str("ab").unwrap(), 2);
    }

    #[test]
    fn test_memory_operation() {
        let mut state = DemoState::new();
        let mut out = Vec::new();
        let fault = memory_operation(&mut state, &mut out).expect("Memory operation failed");
        let target = match fault {
            Fault::HeapOverflow(target) => target,
            other => panic!("Expected a heap overflow, got {:?}", other),
        };
        let base = target.base_address();
        assert_eq!(target.offset(), BUFFER_SIZE);
        assert_eq!(target.address() - target.base_address(), 100);
        assert_eq!(String::from_utf8(out).unwrap(), "Buffer content: Hello, GDB!\n");

        let buffer = state.buffer.as_ref().expect("Buffer should be kept in the state");
        assert_eq!(buffer.len(), BUFFER_SIZE);
        assert_eq!(buffer.as_ptr() as usize, base);
        assert_eq!(state.counter, BUFFER_MESSAGE.len());
    }
}
