//! Channel addressing and the in-memory channel store.
//!
//! Every image channel is held compressed even while the document sits in
//! memory: a 300,000 x 300,000 16-bit channel is 180 GB decompressed, so the
//! engine never keeps a document decompressed at rest. The store is a
//! "super-chunk" of fixed-size blocks, each block independently compressed,
//! which gives random access to any chunk without touching the others.

use std::marker::PhantomData;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use rayon::prelude::*;

use crate::error::{PsdError, Result};
use crate::pixel::Pixel;

/// The different kinds of channels in a layer (color, alpha, masks).
///
/// Negative ids are reserved: -1 transparency, -2 the user-supplied pixel
/// mask, -3 the "real" (vector + pixel) combined mask. Non-negative ids
/// address the color channels of the document's color mode first and named
/// custom channels after those.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PsdChannelKind {
    /// A color channel (0 = red in RGB, cyan in CMYK, gray in grayscale…)
    /// or a named custom channel past the mode's color count.
    Color(u8),
    /// The alpha channel
    TransparencyMask,
    /// The user supplied pixel mask
    UserSuppliedLayerMask,
    /// Both a user mask and a vector mask are present
    RealUserSuppliedLayerMask,
}

impl PsdChannelKind {
    /// Create a new PsdChannelKind from a channel id in a layer record.
    pub fn new(channel_id: i16) -> Result<PsdChannelKind> {
        match channel_id {
            -1 => Ok(PsdChannelKind::TransparencyMask),
            -2 => Ok(PsdChannelKind::UserSuppliedLayerMask),
            -3 => Ok(PsdChannelKind::RealUserSuppliedLayerMask),
            0..=55 => Ok(PsdChannelKind::Color(channel_id as u8)),
            _ => Err(PsdError::InvalidArgument(format!(
                "{} is an invalid channel id, must be -3..=55",
                channel_id
            ))),
        }
    }

    /// The id written into layer records.
    pub fn id(&self) -> i16 {
        match self {
            PsdChannelKind::Color(index) => *index as i16,
            PsdChannelKind::TransparencyMask => -1,
            PsdChannelKind::UserSuppliedLayerMask => -2,
            PsdChannelKind::RealUserSuppliedLayerMask => -3,
        }
    }

    /// Whether this channel is one of the mask channels, which are allowed
    /// to have dimensions differing from the layer's.
    pub fn is_mask(&self) -> bool {
        matches!(
            self,
            PsdChannelKind::UserSuppliedLayerMask | PsdChannelKind::RealUserSuppliedLayerMask
        )
    }

    /// R -> 0
    /// G -> 1
    /// B -> 2
    /// A -> 3
    pub fn rgba_offset(&self) -> Result<usize> {
        match self {
            PsdChannelKind::Color(index @ 0..=2) => Ok(*index as usize),
            PsdChannelKind::TransparencyMask => Ok(3),
            other => Err(PsdError::InvalidArgument(format!(
                "{:?} is not an RGBA channel",
                other
            ))),
        }
    }
}

/// How a channel's data is compressed on disk.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PsdChannelCompression {
    /// Not compressed
    RawData = 0,
    /// Compressed using [PackBits RLE compression](https://en.wikipedia.org/wiki/PackBits)
    RleCompressed = 1,
    /// Zlib stream over all scanlines
    ZipWithoutPrediction = 2,
    /// Zlib stream over per-scanline deltas
    ZipWithPrediction = 3,
}

impl PsdChannelCompression {
    /// Create a new PsdChannelCompression
    pub fn new(compression: u16) -> Result<PsdChannelCompression> {
        match compression {
            0 => Ok(PsdChannelCompression::RawData),
            1 => Ok(PsdChannelCompression::RleCompressed),
            2 => Ok(PsdChannelCompression::ZipWithoutPrediction),
            3 => Ok(PsdChannelCompression::ZipWithPrediction),
            _ => Err(PsdError::InvalidArgument(format!(
                "{} is an invalid layer channel compression. Must be 0, 1, 2 or 3",
                compression
            ))),
        }
    }
}

/// Target uncompressed size of one block in the store.
const CHUNK_BYTES: usize = 1 << 20;

/// A channel's pixels as a sequence of independently compressed fixed-size
/// blocks.
///
/// Append-only at construction; afterwards the buffer is conceptually
/// immutable and any number of readers may pull chunks concurrently. The
/// blocks hold native byte order: the store never leaves memory, and the
/// wire conversion happens in the codecs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedBuffer<T: Pixel> {
    chunks: Vec<Vec<u8>>,
    /// Total number of elements across all chunks
    len: usize,
    marker: PhantomData<T>,
}

impl<T: Pixel> ChunkedBuffer<T> {
    /// Compress `pixels` into the store, one block at a time in parallel.
    pub fn new(pixels: &[T]) -> ChunkedBuffer<T> {
        let chunks = pixels
            .par_chunks(Self::chunk_capacity())
            .map(|chunk| {
                let mut bytes = vec![0u8; chunk.len() * T::BYTES];
                for (pixel, out) in chunk.iter().zip(bytes.chunks_exact_mut(T::BYTES)) {
                    pixel.write_ne(out);
                }
                compress_prepend_size(&bytes)
            })
            .collect();

        ChunkedBuffer {
            chunks,
            len: pixels.len(),
            marker: PhantomData,
        }
    }

    fn chunk_capacity() -> usize {
        CHUNK_BYTES / T::BYTES
    }

    /// Total number of elements held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes of the uncompressed pixel data.
    pub fn original_size(&self) -> usize {
        self.len * T::BYTES
    }

    /// Size in bytes of the compressed representation currently held.
    pub fn compressed_size(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Number of blocks in the store.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Number of elements in chunk `index`. Every chunk but the last holds
    /// the full block capacity.
    pub fn chunk_elems(&self, index: usize) -> Result<usize> {
        if index >= self.chunks.len() {
            return Err(PsdError::InvalidArgument(format!(
                "chunk index {} out of range, buffer holds {} chunks",
                index,
                self.chunks.len()
            )));
        }
        if index + 1 == self.chunks.len() {
            let full = Self::chunk_capacity() * (self.chunks.len() - 1);
            Ok(self.len - full)
        } else {
            Ok(Self::chunk_capacity())
        }
    }

    /// Decompress chunk `index` into `dst` without touching other chunks.
    ///
    /// `dst.len()` must equal `chunk_elems(index)` exactly.
    pub fn get_chunk(&self, dst: &mut [T], index: usize) -> Result<()> {
        let expected = self.chunk_elems(index)?;
        if dst.len() != expected {
            return Err(PsdError::InvalidArgument(format!(
                "destination holds {} elements but chunk {} holds {}",
                dst.len(),
                index,
                expected
            )));
        }

        let bytes = decompress_size_prepended(&self.chunks[index])
            .map_err(|err| PsdError::CompressionError(format!("chunk {}: {}", index, err)))?;
        if bytes.len() != expected * T::BYTES {
            return Err(PsdError::CompressionError(format!(
                "chunk {} decompressed to {} bytes, expected {}",
                index,
                bytes.len(),
                expected * T::BYTES
            )));
        }

        for (pixel, chunk) in dst.iter_mut().zip(bytes.chunks_exact(T::BYTES)) {
            *pixel = T::read_ne(chunk);
        }
        Ok(())
    }

    /// Decompress the whole buffer into a new pixel vector.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut pixels = vec![T::ZERO; self.len];
        let capacity = Self::chunk_capacity();

        // Chunks decode into disjoint windows of the output, in parallel.
        pixels
            .par_chunks_mut(capacity)
            .enumerate()
            .try_for_each(|(index, window)| self.get_chunk(window, index))?;

        Ok(pixels)
    }
}

/// The typed store inside a channel. `Empty` is the state left behind by
/// [`PsdChannel::extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    /// The buffer was moved out
    Empty,
    /// 8-bit pixels
    Eight(ChunkedBuffer<u8>),
    /// 16-bit pixels
    Sixteen(ChunkedBuffer<u16>),
    /// 32-bit float pixels
    ThirtyTwo(ChunkedBuffer<f32>),
}

/// Implemented by the element types a channel can store; maps each to its
/// [`ChannelData`] variant.
pub trait ChannelElement: Pixel {
    /// Wrap a buffer into the matching variant.
    fn wrap(buffer: ChunkedBuffer<Self>) -> ChannelData;
    /// Borrow the buffer if the variant matches.
    fn peek(data: &ChannelData) -> Option<&ChunkedBuffer<Self>>;
    /// Move the buffer out if the variant matches, leaving `Empty`.
    fn take(data: &mut ChannelData) -> Option<ChunkedBuffer<Self>>;
}

macro_rules! impl_channel_element {
    ($ty:ty, $variant:ident) => {
        impl ChannelElement for $ty {
            fn wrap(buffer: ChunkedBuffer<Self>) -> ChannelData {
                ChannelData::$variant(buffer)
            }

            fn peek(data: &ChannelData) -> Option<&ChunkedBuffer<Self>> {
                match data {
                    ChannelData::$variant(buffer) => Some(buffer),
                    _ => None,
                }
            }

            fn take(data: &mut ChannelData) -> Option<ChunkedBuffer<Self>> {
                match std::mem::replace(data, ChannelData::Empty) {
                    ChannelData::$variant(buffer) => Some(buffer),
                    other => {
                        *data = other;
                        None
                    }
                }
            }
        }
    };
}

impl_channel_element!(u8, Eight);
impl_channel_element!(u16, Sixteen);
impl_channel_element!(f32, ThirtyTwo);

/// One channel of a layer: its identity, its own dimensions and offsets,
/// the codec it will be written with, and the compressed store.
///
/// Mask channels commonly have dimensions different from their layer; all
/// non-mask channels of one layer must agree.
#[derive(Debug, Clone, PartialEq)]
pub struct PsdChannel {
    kind: PsdChannelKind,
    /// The codec used when writing the document, not the in-memory codec.
    compression: PsdChannelCompression,
    width: u32,
    height: u32,
    center_x: f32,
    center_y: f32,
    data: ChannelData,
}

impl PsdChannel {
    /// Compress `pixels` into a new channel.
    ///
    /// `pixels.len()` must equal `width * height`.
    pub fn new<T: ChannelElement>(
        kind: PsdChannelKind,
        compression: PsdChannelCompression,
        pixels: &[T],
        width: u32,
        height: u32,
    ) -> Result<PsdChannel> {
        if pixels.len() != width as usize * height as usize {
            return Err(PsdError::InvalidArgument(format!(
                "channel {:?} holds {} pixels but its dimensions are {}x{}",
                kind,
                pixels.len(),
                width,
                height
            )));
        }

        Ok(PsdChannel {
            kind,
            compression,
            width,
            height,
            center_x: 0.0,
            center_y: 0.0,
            data: T::wrap(ChunkedBuffer::new(pixels)),
        })
    }

    /// The channel's identity.
    pub fn kind(&self) -> PsdChannelKind {
        self.kind
    }

    /// The codec this channel will be written with.
    pub fn compression(&self) -> PsdChannelCompression {
        self.compression
    }

    /// Change the codec used at write time.
    pub fn set_compression(&mut self, compression: PsdChannelCompression) {
        self.compression = compression;
    }

    /// Width of the uncompressed channel.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the uncompressed channel.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Center offset relative to the layer, used by masks.
    pub fn center(&self) -> (f32, f32) {
        (self.center_x, self.center_y)
    }

    pub(crate) fn set_center(&mut self, x: f32, y: f32) {
        self.center_x = x;
        self.center_y = y;
    }

    /// Whether the buffer was already moved out by [`extract`](Self::extract).
    pub fn is_extracted(&self) -> bool {
        matches!(self.data, ChannelData::Empty)
    }

    /// Number of blocks in the store.
    pub fn num_chunks(&self) -> Result<usize> {
        match &self.data {
            ChannelData::Empty => Err(self.extracted()),
            ChannelData::Eight(buffer) => Ok(buffer.num_chunks()),
            ChannelData::Sixteen(buffer) => Ok(buffer.num_chunks()),
            ChannelData::ThirtyTwo(buffer) => Ok(buffer.num_chunks()),
        }
    }

    /// Size in bytes of the uncompressed pixel data.
    pub fn byte_size(&self) -> Result<usize> {
        match &self.data {
            ChannelData::Empty => Err(self.extracted()),
            ChannelData::Eight(buffer) => Ok(buffer.original_size()),
            ChannelData::Sixteen(buffer) => Ok(buffer.original_size()),
            ChannelData::ThirtyTwo(buffer) => Ok(buffer.original_size()),
        }
    }

    /// Decompress a copy of the channel. The store stays intact, so this
    /// may be called any number of times.
    pub fn get_data<T: ChannelElement>(&self) -> Result<Vec<T>> {
        self.buffer::<T>()?.to_vec()
    }

    /// Borrow the underlying store.
    pub fn buffer<T: ChannelElement>(&self) -> Result<&ChunkedBuffer<T>> {
        match &self.data {
            ChannelData::Empty => Err(self.extracted()),
            data => T::peek(data).ok_or_else(|| self.wrong_depth::<T>()),
        }
    }

    /// Move the store out of the channel, leaving it empty. A second call
    /// fails with [`PsdError::AlreadyExtracted`].
    pub fn extract<T: ChannelElement>(&mut self) -> Result<ChunkedBuffer<T>> {
        match &self.data {
            ChannelData::Empty => Err(self.extracted()),
            _ => T::take(&mut self.data).ok_or_else(|| self.wrong_depth::<T>()),
        }
    }

    /// Extract and decompress in one step, freeing the compressed store.
    pub fn extract_data<T: ChannelElement>(&mut self) -> Result<Vec<T>> {
        self.extract::<T>()?.to_vec()
    }

    fn extracted(&self) -> PsdError {
        PsdError::AlreadyExtracted {
            channel: self.kind.id(),
        }
    }

    fn wrong_depth<T: Pixel>(&self) -> PsdError {
        PsdError::InvalidArgument(format!(
            "channel {:?} does not hold {}-bit data",
            self.kind,
            T::DEPTH
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(len: usize) -> Vec<u16> {
        (0..len).map(|i| (i % 65536) as u16).collect()
    }

    #[test]
    fn channel_kind_ids_round_trip() {
        for id in [-3, -2, -1, 0, 1, 2, 54, 55] {
            assert_eq!(PsdChannelKind::new(id).unwrap().id(), id);
        }
        assert!(PsdChannelKind::new(-4).is_err());
        assert!(PsdChannelKind::new(56).is_err());
    }

    #[test]
    fn small_buffer_is_one_chunk() {
        let pixels = gradient(16);
        let buffer = ChunkedBuffer::new(&pixels);
        assert_eq!(buffer.num_chunks(), 1);
        assert_eq!(buffer.chunk_elems(0).unwrap(), 16);
        assert_eq!(buffer.original_size(), 32);
        assert_eq!(buffer.to_vec().unwrap(), pixels);
    }

    #[test]
    fn multi_chunk_random_access() {
        // Three full chunks plus a short tail.
        let elems_per_chunk = CHUNK_BYTES / 2;
        let pixels = gradient(elems_per_chunk * 3 + 100);
        let buffer = ChunkedBuffer::new(&pixels);

        assert_eq!(buffer.num_chunks(), 4);
        assert_eq!(buffer.chunk_elems(3).unwrap(), 100);

        let mut tail = vec![0u16; 100];
        buffer.get_chunk(&mut tail, 3).unwrap();
        assert_eq!(&tail[..], &pixels[elems_per_chunk * 3..]);

        let mut second = vec![0u16; elems_per_chunk];
        buffer.get_chunk(&mut second, 1).unwrap();
        assert_eq!(&second[..], &pixels[elems_per_chunk..elems_per_chunk * 2]);
    }

    #[test]
    fn chunk_size_mismatch_is_invalid_argument() {
        let buffer = ChunkedBuffer::new(&gradient(64));
        let mut wrong = vec![0u16; 63];
        assert!(matches!(
            buffer.get_chunk(&mut wrong, 0),
            Err(PsdError::InvalidArgument(_))
        ));
        let mut fine = vec![0u16; 64];
        assert!(matches!(
            buffer.get_chunk(&mut fine, 1),
            Err(PsdError::InvalidArgument(_))
        ));
        buffer.get_chunk(&mut fine, 0).unwrap();
    }

    #[test]
    fn extract_twice_fails_loudly() {
        let pixels: Vec<u8> = vec![255; 64 * 64];
        let mut channel = PsdChannel::new(
            PsdChannelKind::TransparencyMask,
            PsdChannelCompression::RleCompressed,
            &pixels,
            64,
            64,
        )
        .unwrap();

        // Copies first: allowed any number of times.
        assert_eq!(channel.get_data::<u8>().unwrap(), pixels);
        assert_eq!(channel.get_data::<u8>().unwrap(), pixels);

        assert_eq!(channel.extract_data::<u8>().unwrap(), pixels);
        assert!(matches!(
            channel.extract_data::<u8>(),
            Err(PsdError::AlreadyExtracted { channel: -1 })
        ));
        assert!(matches!(
            channel.get_data::<u8>(),
            Err(PsdError::AlreadyExtracted { .. })
        ));
    }

    #[test]
    fn depth_mismatch_is_invalid_argument() {
        let channel = PsdChannel::new(
            PsdChannelKind::Color(0),
            PsdChannelCompression::RawData,
            &[0u8; 4],
            2,
            2,
        )
        .unwrap();
        assert!(matches!(
            channel.get_data::<u16>(),
            Err(PsdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn f32_store_round_trips_exactly() {
        let pixels: Vec<f32> = (0..1000).map(|i| (i as f32) * 0.125 - 3.0).collect();
        let channel = PsdChannel::new(
            PsdChannelKind::Color(1),
            PsdChannelCompression::ZipWithPrediction,
            &pixels,
            100,
            10,
        )
        .unwrap();
        assert_eq!(channel.get_data::<f32>().unwrap(), pixels);
    }
}
