//! Extract command implementation

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::cli::args::ExtractArgs;
use crate::error::ProbeError;
use crate::extract::{extract_all, FieldPath, NotFound};

/// Print the field of every JSON line on stdin. Fails if no line had it.
pub async fn run_extract_command(args: ExtractArgs) -> Result<()> {
    let path = FieldPath::parse(&args.field).map_err(ProbeError::from)?;
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();

    let found = extract_stream(stdin, &mut stdout, &path, args.all).await?;
    if found == 0 {
        return Err(ProbeError::from(NotFound::Missing(path.to_string())).into());
    }
    Ok(())
}

/// Returns the number of lines that contained the field.
pub(crate) async fn extract_stream<R, W>(
    reader: R,
    out: &mut W,
    path: &FieldPath,
    all: bool,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = reader.lines();
    let mut found = 0;

    while let Some(line) = lines.next_line().await.map_err(ProbeError::from)? {
        match extract_all(&line, path) {
            Ok(values) => {
                found += 1;
                if all {
                    for value in values {
                        writeln!(out, "{}", value).map_err(ProbeError::from)?;
                    }
                } else {
                    writeln!(out, "{}", values.join(" ")).map_err(ProbeError::from)?;
                }
                out.flush().map_err(ProbeError::from)?;
            }
            Err(reason) => tracing::trace!("Skipping line ({}): {}", reason, line),
        }
    }
    Ok(found)
}
