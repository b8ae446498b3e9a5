use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoiError {
    #[error("region of interest has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
    #[error("region of interest {roi} does not overlap the {frame_width}x{frame_height} frame")]
    OutsideFrame {
        roi: Roi,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("cannot parse region of interest '{0}': expected x,y,width,height")]
    Parse(String),
}

/// Region of interest in source-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole frame.
    pub fn full(frame_width: u32, frame_height: u32) -> Self {
        Self::new(0, 0, frame_width, frame_height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn validate(&self) -> Result<(), RoiError> {
        if self.width == 0 || self.height == 0 {
            return Err(RoiError::ZeroArea {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Intersects the ROI with a `frame_width` × `frame_height` frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Result<Roi, RoiError> {
        self.validate()?;

        let x1 = self.x.min(frame_width);
        let y1 = self.y.min(frame_height);
        let x2 = self.x.saturating_add(self.width).min(frame_width);
        let y2 = self.y.saturating_add(self.height).min(frame_height);

        if x2 <= x1 || y2 <= y1 {
            return Err(RoiError::OutsideFrame {
                roi: *self,
                frame_width,
                frame_height,
            });
        }
        Ok(Roi::new(x1, y1, x2 - x1, y2 - y1))
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Roi {
    type Err = RoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| RoiError::Parse(s.to_string()))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(Roi::new(*x, *y, *w, *h)),
            _ => Err(RoiError::Parse(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero_width(Roi::new(10, 10, 0, 50))]
    #[case::zero_height(Roi::new(10, 10, 50, 0))]
    #[case::zero_both(Roi::new(0, 0, 0, 0))]
    fn test_validate_rejects_zero_area(#[case] roi: Roi) {
        assert!(matches!(roi.validate(), Err(RoiError::ZeroArea { .. })));
    }

    #[test]
    fn test_clamp_inside_frame_is_unchanged() {
        let roi = Roi::new(10, 20, 100, 50);
        assert_eq!(roi.clamp_to(640, 480).unwrap(), roi);
    }

    #[test]
    fn test_clamp_trims_overhang() {
        let roi = Roi::new(600, 400, 100, 100);
        assert_eq!(roi.clamp_to(640, 480).unwrap(), Roi::new(600, 400, 40, 80));
    }

    #[test]
    fn test_clamp_outside_frame_is_error() {
        let roi = Roi::new(700, 0, 100, 100);
        assert!(matches!(
            roi.clamp_to(640, 480),
            Err(RoiError::OutsideFrame { .. })
        ));
    }

    #[test]
    fn test_clamp_handles_overflowing_extent() {
        let roi = Roi::new(10, 10, u32::MAX, u32::MAX);
        assert_eq!(roi.clamp_to(100, 50).unwrap(), Roi::new(10, 10, 90, 40));
    }

    #[test]
    fn test_full_covers_frame() {
        assert_eq!(Roi::full(320, 240).area(), 320 * 240);
    }

    #[test]
    fn test_parse_and_display() {
        let roi: Roi = "5, 6,70,80".parse().unwrap();
        assert_eq!(roi, Roi::new(5, 6, 70, 80));
        assert_eq!(roi.to_string(), "5,6,70,80");
    }

    #[rstest]
    #[case("1,2,3")]
    #[case("a,b,c,d")]
    #[case("1,2,3,4,5")]
    #[case("-1,2,3,4")]
    fn test_parse_rejects_malformed(#[case] input: &str) {
        assert!(matches!(input.parse::<Roi>(), Err(RoiError::Parse(_))));
    }
}
