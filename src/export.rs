//! Plain-text export of recorded samples.
//!
//! One header line, then `<time>\t<value>` per row. Numbers always use `.` as
//! the decimal separator regardless of locale.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::info;

pub const HEADER: &str = "time\ttemperature";

pub fn write_table<W: Write>(mut writer: W, rows: &[(f64, f64)]) -> io::Result<()> {
    writeln!(writer, "{HEADER}")?;
    for (time, value) in rows {
        writeln!(writer, "{time:.3}\t{value:.2}")?;
    }
    writer.flush()
}

/// Create (or truncate) `path` and write the table into it.
pub fn save_to_path(path: impl AsRef<Path>, rows: &[(f64, f64)]) -> io::Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_table(BufWriter::new(file), rows)?;
    info!("saved {} samples to {}", rows.len(), path.display());
    Ok(())
}
