use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("CSV headers must be written before any record")]
    LateCsvHeaders,
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Output::new(io, self.format, self.output))
    }
}

/// Renders records as a table, CSV rows, or one JSON document per line.
///
/// A single record may span several table rows (e.g. all readings of one definition group) while
/// still being a single JSON line.
pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_records: bool },
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl Output {
    fn new(io: Box<dyn std::io::Write>, format: Format, path: Option<PathBuf>) -> Self {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_records: false },
        };
        Self { path, io, formatter }
    }

    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                if *written_records {
                    return Err(Error::LateCsvHeaders);
                }
                *written_records = true;
                self.write_csv_row(&hdrs)?;
            }
            Formatter::Table { comfy } => {
                comfy.set_header(hdrs);
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        // Worst case every byte is a quote that needs escaping, plus the surrounding quotes.
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (_, ob) = writer.delimiter(&mut output);
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (result, _, ob) = writer.field(value.as_bytes(), &mut output);
            debug_assert!(matches!(result, WriteResult::InputEmpty));
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (_, ob) = writer.terminator(&mut output);
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    /// Output a record that is rendered as `table_rows` in tabular formats.
    pub fn record<R: serde::Serialize>(
        &mut self,
        table_rows: impl FnOnce() -> Vec<Vec<String>>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                *written_records = true;
                for row in table_rows() {
                    self.write_csv_row(&row)?;
                }
            }
            Formatter::Table { comfy } => {
                comfy.add_rows(table_rows());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        match &self.formatter {
            Formatter::Csv { written_records: _ } => {}
            Formatter::Table { comfy } => {
                writeln!(self.io, "{}", comfy).map_err(|e| self.write_error(e))?;
            }
            Formatter::Jsonl => {}
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn rows() -> Vec<Vec<String>> {
        vec![
            vec!["1".to_string(), "hot gas, \"BT14\"".to_string()],
            vec!["2".to_string(), "flow".to_string()],
        ]
    }

    #[test]
    fn csv_rows_are_quoted() {
        let buffer = SharedBuffer::default();
        let mut output = Output::new(Box::new(buffer.clone()), Format::Csv, None);
        output.table_headers(vec!["ID", "Name"]).unwrap();
        output.record(rows, || ()).unwrap();
        output.commit().unwrap();
        assert_eq!(buffer.contents(), "ID,Name\n1,\"hot gas, \"\"BT14\"\"\"\n2,flow\n");
    }

    #[test]
    fn csv_headers_must_come_first() {
        let buffer = SharedBuffer::default();
        let mut output = Output::new(Box::new(buffer), Format::Csv, None);
        output.record(rows, || ()).unwrap();
        assert!(matches!(output.table_headers(vec!["ID"]), Err(Error::LateCsvHeaders)));
    }

    #[test]
    fn jsonl_writes_one_line_per_record() {
        let buffer = SharedBuffer::default();
        let mut output = Output::new(Box::new(buffer.clone()), Format::Jsonl, None);
        output.table_headers(vec!["ID", "Name"]).unwrap();
        output.record(rows, || serde_json::json!({"group": "a"})).unwrap();
        output.record(rows, || serde_json::json!({"group": "b"})).unwrap();
        output.commit().unwrap();
        assert_eq!(buffer.contents(), "{\"group\":\"a\"}\n{\"group\":\"b\"}\n");
    }

    #[test]
    fn table_contains_every_row() {
        let buffer = SharedBuffer::default();
        let mut output = Output::new(Box::new(buffer.clone()), Format::Table, None);
        output.table_headers(vec!["ID", "Name"]).unwrap();
        output.record(rows, || ()).unwrap();
        output.commit().unwrap();
        let contents = buffer.contents();
        assert!(contents.contains("hot gas"));
        assert!(contents.contains("flow"));
        assert!(contents.contains("Name"));
    }
}
