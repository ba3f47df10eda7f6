use crate::{commands::OutputFormat, error::CliError};
use engine_runtime::convert::{CloudEventsConverter, JsonConverter, RecordConverter};
use model::records::record::SourceRecord;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub fn converter(format: OutputFormat, connector: &str) -> Box<dyn RecordConverter> {
    match format {
        OutputFormat::Json => Box::new(JsonConverter),
        OutputFormat::Cloudevents => Box::new(CloudEventsConverter::new(connector)),
    }
}

/// Writes each record as one JSON line and flushes once per batch.
pub async fn write_records<W>(
    records: &[SourceRecord],
    converter: &dyn RecordConverter,
    out: &mut W,
) -> Result<(), CliError>
where
    W: AsyncWrite + Unpin,
{
    for record in records {
        let mut line = serde_json::to_vec(&converter.convert(record)?)?;
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await?;
    Ok(())
}
