//! Square block tiling.
//!
//! Tile `i` of a `W × H` grid with edge `T` sits at column `i % (W/T)` and
//! row `i / (W/T)` of the tile grid; its pixels keep their row-major order.

use crate::error::TileError;
use crate::pixel::Grid;

/// One `T × T` block cut out of a larger grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile<T> {
    pub index: usize,
    /// Pixel offset of the top-left corner in the source grid.
    pub x: u32,
    pub y: u32,
    pub pixels: Grid<T>,
}

/// Cuts grids into fixed-size square tiles in raster order.
#[derive(Debug, Clone, Copy)]
pub struct Tiler {
    edge: u32,
}

impl Tiler {
    pub fn new(edge: u32) -> Result<Self, TileError> {
        if edge == 0 {
            return Err(TileError::Precondition("tile edge must be > 0".into()));
        }
        Ok(Self { edge })
    }

    pub fn edge(&self) -> u32 {
        self.edge
    }

    /// Tiles per row and per column for a `width × height` grid.
    pub fn grid_size(&self, width: u32, height: u32) -> Result<(u32, u32), TileError> {
        if width % self.edge != 0 || height % self.edge != 0 {
            return Err(TileError::Shape {
                width,
                height,
                tile: self.edge,
            });
        }
        Ok((width / self.edge, height / self.edge))
    }

    /// Pixel offset of tile `index` for a grid `columns` tiles wide.
    pub fn placement(&self, index: usize, columns: u32) -> (u32, u32) {
        let columns = columns as usize;
        let col = (index % columns) as u32;
        let row = (index / columns) as u32;
        (col * self.edge, row * self.edge)
    }

    /// Split `grid` into tiles, left to right then top to bottom.
    pub fn split<T: Copy>(&self, grid: &Grid<T>) -> Result<Vec<Tile<T>>, TileError> {
        let (columns, rows) = self.grid_size(grid.width(), grid.height())?;
        let edge = self.edge as usize;
        let count = columns as usize * rows as usize;
        let mut tiles = Vec::with_capacity(count);

        for index in 0..count {
            let (x, y) = self.placement(index, columns);
            let mut data = Vec::with_capacity(edge * edge);
            for r in 0..self.edge {
                let row = grid.row(y + r);
                data.extend_from_slice(&row[x as usize..x as usize + edge]);
            }
            tiles.push(Tile {
                index,
                x,
                y,
                pixels: Grid::new(self.edge, self.edge, data)?,
            });
        }
        Ok(tiles)
    }

    /// Put tiles back together into a `width × height` grid.
    ///
    /// Inverse of [`split`](Self::split); tiles are placed by their index.
    pub fn reassemble<T: Copy + Default>(
        &self,
        tiles: &[Tile<T>],
        width: u32,
        height: u32,
    ) -> Result<Grid<T>, TileError> {
        let (columns, rows) = self.grid_size(width, height)?;
        if tiles.len() != columns as usize * rows as usize {
            return Err(TileError::Precondition(format!(
                "{} tiles cannot fill a {columns}x{rows} tile grid",
                tiles.len()
            )));
        }
        let mut data = vec![T::default(); width as usize * height as usize];
        for tile in tiles {
            if tile.pixels.dimensions() != (self.edge, self.edge) {
                return Err(TileError::Precondition(format!(
                    "tile {} is {:?}, expected {}x{}",
                    tile.index,
                    tile.pixels.dimensions(),
                    self.edge,
                    self.edge
                )));
            }
            let (x, y) = self.placement(tile.index, columns);
            for r in 0..self.edge {
                let dst = (y + r) as usize * width as usize + x as usize;
                data[dst..dst + self.edge as usize].copy_from_slice(tile.pixels.row(r));
            }
        }
        Grid::new(width, height, data)
    }
}
