//! Fixed-capacity circular byte buffer.
//!
//! Backs both halves of the console tunnel.  Producer and consumer are the
//! same dispatch thread, so no atomics: a read cursor plus a fill count.
//!
//! ```text
//!   head            head + len
//!    │                  │
//!  ┌─▼──────────────────▼──────────┐
//!  │ o │ o │ o │ o │ . │ . │ . │ . │   N slots, wraps modulo N
//!  └───────────────────────────────┘
//! ```

/// `push` was attempted with no free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

impl core::fmt::Display for Full {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ring buffer full")
    }
}

#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            head: 0,
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes waiting to be popped.
    pub const fn used(&self) -> usize {
        self.len
    }

    pub const fn free(&self) -> usize {
        N - self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    /// Append one byte at the tail.
    pub fn push(&mut self, byte: u8) -> Result<(), Full> {
        if self.is_full() {
            return Err(Full);
        }
        let tail = (self.head + self.len) % N;
        self.buf[tail] = byte;
        self.len += 1;
        Ok(())
    }

    /// Remove the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(byte)
    }

    /// Push as much of `data` as fits, in order.  Returns the accepted count;
    /// the remainder is dropped.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in data {
            if self.push(byte).is_err() {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Pop up to `out.len()` bytes into `out`.  Returns the count popped.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek_into(out);
        self.discard(n)
    }

    /// Copy up to `out.len()` of the oldest bytes without consuming them.
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = self.buf[(self.head + i) % N];
        }
        n
    }

    /// Drop up to `n` of the oldest bytes.  Returns the count dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        if n > 0 {
            self.head = (self.head + n) % N;
            self.len -= n;
        }
        n
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
