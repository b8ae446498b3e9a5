use ndarray::{s, ArrayView3};

/// A decoded video frame, or a crop of one: contiguous RGB bytes in
/// row-major order.
///
/// `index` is always the frame's position in the full, undecimated source
/// sequence. Crops inherit the index of the frame they were cut from.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the `width` × `height` rectangle at (`x`, `y`) into a new frame.
    ///
    /// The rectangle is intersected with the frame bounds first, so the
    /// result may be smaller than requested (or empty).
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Frame {
        let x1 = x.min(self.width) as usize;
        let y1 = y.min(self.height) as usize;
        let x2 = x.saturating_add(width).min(self.width) as usize;
        let y2 = y.saturating_add(height).min(self.height) as usize;

        let view = self.as_ndarray();
        let region = view.slice(s![y1..y2, x1..x2, ..]);
        let data: Vec<u8> = region.iter().copied().collect();

        Frame::new(
            data,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
            self.channels,
            self.index,
        )
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
