//! Trace file model and reader.
//!
//! Traces are CSV files with the header
//! `ts,hname,d_number,op,address,size,r_time`; the historical `adress`
//! spelling of the address column is accepted as well.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Read,
    Write,
}

/// One storage access parsed from a trace row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub ts: u64,
    pub hname: String,
    pub d_number: u64,
    pub op: String,
    #[serde(alias = "adress")]
    pub address: u64,
    pub size: u64,
    pub r_time: u64,
}

impl Access {
    /// Operation kind; anything other than a literal `Read` is a write.
    #[must_use]
    pub fn op(&self) -> Op {
        if self.op == "Read" {
            Op::Read
        } else {
            Op::Write
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("failed to open trace file: {0}")]
    Open(#[from] io::Error),
    #[error("malformed trace row: {0}")]
    Parse(#[from] csv::Error),
}

/// Streaming reader over a trace file with skip and limit controls.
pub struct TraceReader<R: io::Read> {
    rows: csv::DeserializeRecordsIntoIter<R, Access>,
    remaining: u64,
}

impl TraceReader<File> {
    pub fn open(path: impl AsRef<Path>, skip: u64, limit: Option<u64>) -> Result<Self, ReadError> {
        let file = File::open(path.as_ref())?;
        log::debug!("reading trace {}", path.as_ref().display());
        Self::from_reader(file, skip, limit)
    }
}

impl<R: io::Read> TraceReader<R> {
    pub fn from_reader(reader: R, skip: u64, limit: Option<u64>) -> Result<Self, ReadError> {
        let mut rows = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_deserialize();
        for _ in 0..skip {
            match rows.next() {
                Some(row) => {
                    row?;
                }
                None => break,
            }
        }
        Ok(Self {
            rows,
            remaining: limit.unwrap_or(u64::MAX),
        })
    }

    /// Read the whole remaining trace into memory.
    pub fn preload(self) -> Result<Vec<Access>, ReadError> {
        log::info!("trace preloading started");
        let accesses = self.collect::<Result<Vec<_>, _>>()?;
        log::info!("trace preloading finished ({} requests)", accesses.len());
        Ok(accesses)
    }
}

impl<R: io::Read> Iterator for TraceReader<R> {
    type Item = Result<Access, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.rows.next().map(|row| row.map_err(ReadError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::{Op, TraceReader};
    use std::io::Cursor;

    const TRACE: &str = "\
ts,hname,d_number,op,adress,size,r_time
1,host0,0,Read,0,512,10
2,host0,0,Write,512,1024,11
3,host0,0,Read,1536,512,12
4,host0,0,Read,4096,512,13
";

    #[test]
    fn parses_rows_with_historical_address_column() {
        let rows = TraceReader::from_reader(Cursor::new(TRACE), 0, None)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].address, 0);
        assert_eq!(rows[1].address, 512);
        assert_eq!(rows[1].size, 1024);
        assert_eq!(rows[0].op(), Op::Read);
        assert_eq!(rows[1].op(), Op::Write);
    }

    #[test]
    fn skip_and_limit_bound_the_stream() {
        let rows = TraceReader::from_reader(Cursor::new(TRACE), 1, Some(2))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].address, 512);
        assert_eq!(rows[1].address, 1536);
    }

    #[test]
    fn unknown_ops_fall_back_to_write() {
        let trace = "ts,hname,d_number,op,address,size,r_time\n1,h,0,TRIM,0,512,1\n";
        let rows = TraceReader::from_reader(Cursor::new(trace), 0, None)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows[0].op(), Op::Write);
    }

    #[test]
    fn preload_collects_everything() {
        let rows = TraceReader::from_reader(Cursor::new(TRACE), 0, None)
            .unwrap()
            .preload()
            .unwrap();
        assert_eq!(rows.len(), 4);
    }
}
