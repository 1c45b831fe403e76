/// One batch of interleaved 16-bit little-endian frames delivered by a
/// single acquire/release cycle against an endpoint.
///
/// The bytes borrow the endpoint's own buffer and are only valid until the
/// chunk is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    data: &'a [u8],
    frame_count: u32,
    silent: bool,
}

impl<'a> Chunk<'a> {
    /// A chunk carrying real sample bytes.
    pub fn audio(data: &'a [u8], frame_count: u32) -> Self {
        Self {
            data,
            frame_count,
            silent: false,
        }
    }

    /// A gap/underrun signaled by the endpoint: `frame_count` frames of
    /// silence with no sample bytes behind them.
    pub fn silent(frame_count: u32) -> Chunk<'static> {
        Chunk {
            data: &[],
            frame_count,
            silent: true,
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Raw sample bytes; empty for silent chunks.
    pub fn data(&self) -> &'a [u8] {
        if self.silent {
            &[]
        } else {
            self.data
        }
    }
}
