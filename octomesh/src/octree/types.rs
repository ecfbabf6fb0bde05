//! Strongly-typed cube corners, axes and sides

/// A single axis, represented as a `u8` with one bit (between 0 and 2) set
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Axis(u8);

impl Axis {
    /// Builds a new axis
    ///
    /// # Panics
    /// If the input does not have exactly 1 set bit in the 0-2 range
    pub const fn new(i: u8) -> Self {
        assert!(i.count_ones() == 1);
        assert!(i.trailing_zeros() < 3);
        Self(i)
    }

    /// Converts from a bitmask to an index
    pub fn index(self) -> usize {
        self.0.trailing_zeros() as usize
    }

    /// Iterates over the three axes
    pub fn iter() -> impl Iterator<Item = Axis> {
        [X, Y, Z].into_iter()
    }
}

/// The X axis, i.e. `[1, 0, 0]`
pub const X: Axis = Axis(1);
/// The Y axis, i.e. `[0, 1, 0]`
pub const Y: Axis = Axis(2);
/// The Z axis, i.e. `[0, 0, 1]`
pub const Z: Axis = Axis(4);

impl std::ops::BitAnd<Corner> for Axis {
    type Output = bool;
    fn bitand(self, rhs: Corner) -> bool {
        (self.0 & rhs.0) != 0
    }
}

impl std::ops::BitOr<Corner> for Axis {
    type Output = Corner;
    fn bitor(self, rhs: Corner) -> Corner {
        Corner(self.0 | rhs.0)
    }
}

impl From<Axis> for Corner {
    fn from(a: Axis) -> Self {
        Corner(a.0)
    }
}

/// Strongly-typed cube corner, in the `[0, 8)` range
///
/// Bit 0 selects the upper half along X, bit 1 along Y and bit 2 along Z;
/// children of a cube are numbered the same way.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Corner(u8);

impl Corner {
    /// Builds a new corner
    ///
    /// # Panics
    /// If `i >= 8`, which is not a valid corner index
    pub const fn new(i: u8) -> Self {
        assert!(i < 8);
        Self(i)
    }

    /// Returns the value of this corner as an index
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates over all 8 corners
    pub fn iter() -> impl Iterator<Item = Corner> {
        (0..8).map(Corner)
    }

    /// Returns the offset of this corner as a 0/1 triple
    pub fn offset(self) -> [i64; 3] {
        [(self & X) as i64, (self & Y) as i64, (self & Z) as i64]
    }
}

impl std::ops::BitAnd<Axis> for Corner {
    type Output = bool;
    fn bitand(self, rhs: Axis) -> bool {
        (self.0 & rhs.0) != 0
    }
}

impl std::ops::BitOr<Axis> for Corner {
    type Output = Corner;
    fn bitor(self, rhs: Axis) -> Corner {
        Corner(self.0 | rhs.0)
    }
}

/// One of the six sides of a cube
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Side(u8);

impl Side {
    /// Builds a side from an axis and a direction
    pub fn new(axis: Axis, positive: bool) -> Self {
        Self(axis.index() as u8 * 2 + positive as u8)
    }

    /// Builds a side from its index (`2 * axis + positive`)
    ///
    /// # Panics
    /// If `i >= 6`
    pub const fn from_index(i: usize) -> Self {
        assert!(i < 6);
        Self(i as u8)
    }

    /// Iterates over all six sides
    pub fn iter() -> impl Iterator<Item = Side> {
        (0..6).map(Side)
    }

    /// Returns the index of this side
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the axis normal to this side
    pub fn axis(self) -> Axis {
        Axis(1 << (self.0 / 2))
    }

    /// Checks whether the side faces the positive direction of its axis
    pub fn is_positive(self) -> bool {
        self.0 % 2 == 1
    }

    /// Returns the side on the other end of the axis
    pub fn opposite(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Returns the unit integer step across this side
    pub fn step(self) -> [i64; 3] {
        let mut out = [0; 3];
        out[self.axis().index()] = if self.is_positive() { 1 } else { -1 };
        out
    }

    /// Returns the corners of this side, counter-clockwise seen from outside
    pub fn corners(self) -> [Corner; 4] {
        const SIDES: [[u8; 4]; 6] = [
            [0, 4, 6, 2],
            [1, 3, 7, 5],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 2, 3, 1],
            [4, 5, 7, 6],
        ];
        SIDES[self.index()].map(Corner)
    }

    /// Checks whether a corner (or child position) lies on this side
    pub fn contains(self, c: Corner) -> bool {
        (self.axis() & c) == self.is_positive()
    }
}

/// Returns the 12 edges of a cube as corner pairs
pub fn cube_edges() -> impl Iterator<Item = (Corner, Corner)> {
    Axis::iter().flat_map(|a| {
        Corner::iter()
            .filter(move |c| !(a & *c))
            .map(move |c| (c, a | c))
    })
}
