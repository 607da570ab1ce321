//! Pixel canvas.
//!
//! A fixed `width x height` grid painted through a contract. Each
//! `PixelPainted` event overwrites one pixel; the last writer by order key
//! wins. The canvas is small and bounded, so every cycle replays the full
//! history. Pixels never painted show the background color.

use std::fmt;
use std::str::FromStr;

use ledgerview_core::{
    Address, DecodeError, Error, EventShape, LogFilter, RawRecord, SubmissionError,
};
use serde::{Deserialize, Serialize};

use crate::decoder::{Decoded, EventDecoder};
use crate::domain::{json_payload, Domain, FetchStrategy, Intent};
use crate::domains::{expect_source, parse_address, parse_body};
use crate::projection::{ProjectionState, Reducer};
use crate::view::MergedView;

/// Event shape emitted when a pixel is painted.
pub const PIXEL_PAINTED: &str = "PixelPainted";

/// Grid coordinate. Orders row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    /// Row.
    pub y: u32,
    /// Column.
    pub x: u32,
}

impl Coord {
    /// Creates a coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { y, x }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A `#rgb` or `#rrggbb` color, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Parses a hex color.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless `value` is `#` followed by 3 or
    /// 6 hex digits.
    pub fn new(value: impl AsRef<str>) -> Result<Self, Error> {
        let value = value.as_ref();
        let digits = value
            .strip_prefix('#')
            .ok_or_else(|| Error::InvalidInput(format!("color must start with '#': '{value}'")))?;
        if !matches!(digits.len(), 3 | 6) || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!(
                "color must be #rgb or #rrggbb: '{value}'"
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Returns the normalized color string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Projected pixel: its color and who painted it last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pixel {
    /// Current color.
    pub color: Color,
    /// Last painter.
    pub painter: Address,
}

impl Pixel {
    /// Creates a pixel.
    #[must_use]
    pub const fn new(color: Color, painter: Address) -> Self {
        Self { color, painter }
    }
}

/// Canvas events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasEvent {
    /// A pixel was painted.
    PixelPainted {
        /// Painted coordinate.
        coord: Coord,
        /// New color.
        color: Color,
        /// Account that paid for the paint.
        painter: Address,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct PixelPaintedBody {
    index: u32,
    color: String,
    painter: String,
}

/// Canvas domain bound to one contract.
#[derive(Debug, Clone)]
pub struct CanvasDomain {
    contract: Address,
    width: u32,
    height: u32,
    background: Color,
    paint_fee: u128,
}

impl CanvasDomain {
    /// Default background for pixels never painted.
    pub const DEFAULT_BACKGROUND: &'static str = "#ffffff";

    /// Creates a canvas of `width x height` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if either dimension is zero or the
    /// pixel count does not fit an index.
    pub fn new(contract: Address, width: u32, height: u32) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "canvas dimensions must be non-zero (got {width}x{height})"
            )));
        }
        if width.checked_mul(height).is_none() {
            return Err(Error::InvalidInput(format!(
                "canvas of {width}x{height} pixels is too large"
            )));
        }
        Ok(Self {
            contract,
            width,
            height,
            background: Color(Self::DEFAULT_BACKGROUND.to_string()),
            paint_fee: 0,
        })
    }

    /// Sets the background color.
    #[must_use]
    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    /// Sets the value attached to each paint.
    #[must_use]
    pub const fn with_paint_fee(mut self, fee: u128) -> Self {
        self.paint_fee = fee;
        self
    }

    /// Contract address.
    #[must_use]
    pub const fn contract(&self) -> &Address {
        &self.contract
    }

    /// Event shape for painted pixels.
    #[must_use]
    pub fn shape(&self) -> EventShape {
        EventShape::new(PIXEL_PAINTED)
    }

    /// Grid width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Background color.
    #[must_use]
    pub const fn background(&self) -> &Color {
        &self.background
    }

    /// Encodes a coordinate as `y * width + x`.
    #[must_use]
    pub fn index_of(&self, coord: Coord) -> Option<u32> {
        (coord.x < self.width && coord.y < self.height).then(|| coord.y * self.width + coord.x)
    }

    /// Decodes an index back into a coordinate.
    #[must_use]
    pub fn coord_of(&self, index: u32) -> Option<Coord> {
        (index < self.width * self.height)
            .then(|| Coord::new(index % self.width, index / self.width))
    }

    /// Color shown for a pixel, falling back to the background.
    #[must_use]
    pub fn color_of<'a>(&'a self, pixel: Option<&'a Pixel>) -> &'a Color {
        pixel.map_or(&self.background, |pixel| &pixel.color)
    }

    /// Colors of the merged view, one row per `y`.
    #[must_use]
    pub fn render(&self, view: &MergedView<Coord, Pixel>) -> Vec<Vec<Color>> {
        (0..self.height)
            .map(|y| {
                (0..self.width)
                    .map(|x| self.color_of(view.get(&Coord::new(x, y))).clone())
                    .collect()
            })
            .collect()
    }
}

impl EventDecoder for CanvasDomain {
    type Event = CanvasEvent;

    fn decode(&self, raw: &RawRecord) -> Result<CanvasEvent, DecodeError> {
        expect_source(raw, &self.contract, &self.shape())?;
        let body: PixelPaintedBody = parse_body(raw)?;

        let coord = self.coord_of(body.index).ok_or_else(|| {
            DecodeError::invalid_field(
                "index",
                format!("{} is outside a {}x{} canvas", body.index, self.width, self.height),
            )
        })?;
        let color =
            Color::new(&body.color).map_err(|e| DecodeError::invalid_field("color", e.to_string()))?;
        let painter = parse_address("painter", &body.painter)?;

        Ok(CanvasEvent::PixelPainted {
            coord,
            color,
            painter,
        })
    }
}

impl Reducer for CanvasDomain {
    type Key = Coord;
    type Value = Pixel;

    fn reduce(&self, state: &mut ProjectionState<Coord, Pixel>, event: &Decoded<CanvasEvent>) {
        let CanvasEvent::PixelPainted {
            coord,
            color,
            painter,
        } = &event.event;
        state.put(*coord, Pixel::new(color.clone(), painter.clone()), event.order);
    }
}

impl Domain for CanvasDomain {
    fn name(&self) -> &'static str {
        "canvas"
    }

    fn filter(&self) -> LogFilter {
        LogFilter::new(self.contract.clone(), self.shape())
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::FullReplay
    }

    fn key_of(&self, event: &CanvasEvent) -> Coord {
        let CanvasEvent::PixelPainted { coord, .. } = event;
        *coord
    }

    fn author_of<'e>(&self, event: &'e CanvasEvent) -> &'e Address {
        let CanvasEvent::PixelPainted { painter, .. } = event;
        painter
    }

    fn encode_intent(
        &self,
        key: &Coord,
        value: &Pixel,
        origin: &Address,
    ) -> Result<Intent, SubmissionError> {
        let index = self.index_of(*key).ok_or_else(|| SubmissionError::Encode {
            message: format!("{key} is outside a {}x{} canvas", self.width, self.height),
        })?;
        if &value.painter != origin {
            return Err(SubmissionError::Encode {
                message: format!("pixel painter {} is not the sender {origin}", value.painter),
            });
        }
        let payload = json_payload(&PixelPaintedBody {
            index,
            color: value.color.to_string(),
            painter: origin.to_string(),
        })?;
        Ok(Intent {
            target: self.contract.clone(),
            payload,
            value: self.paint_fee,
        })
    }
}
