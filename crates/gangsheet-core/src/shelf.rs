//! Shelf (row) placement: items go left-to-right, wrap to a new row when a
//! row runs out of width, and signal a full sheet when a new row runs out of
//! height.

/// Outcome of one placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShelfFit {
    /// Item placed with its top-left at `(x, y)`.
    At(u32, u32),
    /// No vertical room left; the sheet part is full.
    Full,
}

/// Mutable cursor over one sheet part's rows.
#[derive(Debug, Clone)]
pub struct ShelfCursor {
    width: u32,
    height: u32,
    spacing_x: u32,
    spacing_y: u32,
    x: u32,
    y: u32,
    row_height: u32,
    placed: usize,
}

impl ShelfCursor {
    pub fn new(width: u32, height: u32, spacing_x: u32, spacing_y: u32) -> Self {
        Self {
            width,
            height,
            spacing_x,
            spacing_y,
            x: 0,
            y: 0,
            row_height: 0,
            placed: 0,
        }
    }

    /// Number of items placed so far on this part.
    pub fn placed(&self) -> usize {
        self.placed
    }

    /// True when a `w`×`h` item could sit on a fresh, empty part of this size.
    pub fn fits_fresh(w: u32, h: u32, width: u32, height: u32) -> bool {
        w > 0 && h > 0 && w <= width && h <= height
    }

    /// Attempts to place a `w`×`h` item at the cursor.
    ///
    /// Wraps to a new row when the current row lacks horizontal room; reports
    /// `Full` when the wrapped row lacks vertical room. On `Full` the cursor
    /// is left untouched so the caller's resume point stays exact.
    pub fn place(&mut self, w: u32, h: u32) -> ShelfFit {
        if w == 0 || h == 0 || w > self.width || h > self.height {
            return ShelfFit::Full;
        }
        let (mut px, mut py) = (self.x, self.y);
        let mut wrapped = false;
        if px + w > self.width {
            px = 0;
            py = self.y + self.row_height + self.spacing_y;
            wrapped = true;
        }
        if py + h > self.height {
            return ShelfFit::Full;
        }
        if wrapped {
            self.y = py;
            self.row_height = 0;
        }
        self.x = px + w + self.spacing_x;
        self.row_height = self.row_height.max(h);
        self.placed += 1;
        ShelfFit::At(px, py)
    }
}
