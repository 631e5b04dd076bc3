use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write results to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
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
    #[error("could not serialize a result to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("could not encode a result as CSV")]
    SerializeCsv,
}

/// One result line, with a column per header for tabular formats and a JSON object otherwise.
pub trait Record: serde::Serialize {
    const HEADERS: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output<R: Record>(&self) -> Result<Output<R>, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<dyn std::io::Write>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Output::new(io, self.format, self.output.clone())
    }
}

enum Formatter {
    Table(comfy_table::Table),
    Jsonl,
    Csv,
}

pub struct Output<R> {
    io: Box<dyn std::io::Write>,
    path: Option<PathBuf>,
    formatter: Formatter,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: Record> Output<R> {
    pub fn new(
        io: Box<dyn std::io::Write>,
        format: Format,
        path: Option<PathBuf>,
    ) -> Result<Self, Error> {
        let formatter = match format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table
                    .set_header(R::HEADERS.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table(table)
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        let mut output = Self { io, path, formatter, _record: std::marker::PhantomData };
        if let Formatter::Csv = output.formatter {
            output.write_csv_row(R::HEADERS)?;
        }
        Ok(output)
    }

    pub fn record(&mut self, record: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Table(table) => {
                table.add_row(record.cells());
            }
            Formatter::Csv => {
                let cells = record.cells();
                self.write_csv_row(&cells)?;
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?;
            }
        }
        Ok(())
    }

    fn write_csv_row<V: AsRef<str>>(&mut self, values: &[V]) -> Result<(), Error> {
        // Quoting at most doubles a field, plus the quotes and the terminator.
        let longest = values.iter().map(|v| v.as_ref().len()).max().unwrap_or(0);
        let mut buffer = vec![0; 2 * longest + 4];
        let mut line = Vec::new();
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                let (WriteResult::InputEmpty, n) = writer.delimiter(&mut buffer) else {
                    return Err(Error::SerializeCsv);
                };
                line.extend_from_slice(&buffer[..n]);
            }
            let (WriteResult::InputEmpty, _, n) = writer.field(value.as_ref().as_bytes(), &mut buffer)
            else {
                return Err(Error::SerializeCsv);
            };
            line.extend_from_slice(&buffer[..n]);
        }
        let (WriteResult::InputEmpty, n) = writer.terminator(&mut buffer) else {
            return Err(Error::SerializeCsv);
        };
        line.extend_from_slice(&buffer[..n]);
        self.io.write_all(&line).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table(table) = &self.formatter {
            let rendered = format!("{table}\n");
            self.io.write_all(rendered.as_bytes()).map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
