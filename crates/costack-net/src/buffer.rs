//! Byte buffer with a consume cursor
//!
//! Data is appended at the back and consumed from the front. Consumed space
//! is reclaimed lazily, when it exceeds the live bytes.

#[derive(Debug, Default)]
pub struct ConnectionBuffer {
    data: Vec<u8>,
    start: usize,
    limit: Option<usize>,
}

impl ConnectionBuffer {
    /// Buffer without a size limit
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Buffer that never holds more than `limit` bytes
    pub fn bounded(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            start: 0,
            limit: Some(limit),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can still be appended
    #[inline]
    pub fn space(&self) -> usize {
        match self.limit {
            Some(limit) => limit.saturating_sub(self.len()),
            None => usize::MAX - self.len(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Append as much of `bytes` as fits; returns the count appended
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.space());
        if n == 0 {
            return 0;
        }
        self.compact();
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    /// Drop `n` bytes from the front
    ///
    /// # Panics
    ///
    /// If fewer than `n` bytes are buffered.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume {} from buffer of {}", n, self.len());
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    fn compact(&mut self) {
        if self.start > 0 && self.start >= self.len() {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_consume() {
        let mut buf = ConnectionBuffer::unbounded();
        assert!(buf.is_empty());
        assert_eq!(buf.append(b"hello world"), 11);
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
        assert_eq!(buf.append(b"!"), 1);
        assert_eq!(buf.as_slice(), b"world!");
        buf.consume(6);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bounded_accepts_what_fits() {
        let mut buf = ConnectionBuffer::bounded(8);
        assert_eq!(buf.append(b"0123456789"), 8);
        assert_eq!(buf.space(), 0);
        assert_eq!(buf.append(b"x"), 0);
        buf.consume(3);
        assert_eq!(buf.space(), 3);
        assert_eq!(buf.append(b"abcd"), 3);
        assert_eq!(buf.as_slice(), b"34567abc");
    }

    #[test]
    fn test_compaction_keeps_order() {
        let mut buf = ConnectionBuffer::unbounded();
        buf.append(b"aaaabbbb");
        buf.consume(6);
        buf.append(b"cc");
        assert_eq!(buf.as_slice(), b"bbcc");
        assert_eq!(buf.start, 0);
    }

    #[test]
    #[should_panic(expected = "consume 5 from buffer of 4")]
    fn test_over_consume_panics() {
        let mut buf = ConnectionBuffer::unbounded();
        buf.append(b"abcd");
        buf.consume(5);
    }
}
