//! Tabular primitives for tractscore: an Arrow-backed table with left joins,
//! scalar cell values, delimited text I/O, and floor rounding.

pub mod io;
pub mod round;
pub mod table;
pub mod value;

pub use arrow;

pub use io::{Encoding, ReadOptions, UTF8_BOM, read_delimited, read_delimited_from, write_csv};
pub use round::{floor_round, floor_to_int};
pub use table::Table;
pub use value::Value;
