use std::io::Read;
use std::sync::Arc;

use flate2::read::MultiGzDecoder;

use crate::error::Error;
use crate::prelude::*;

use super::line_item::{Header, RawLineItem};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug)]
pub struct DecodedExport {
    pub header: Arc<Header>,
    pub items: Vec<RawLineItem>,
}

/// Decodes a CUR export. Gzip is detected from the magic bytes, plain CSV passes through.
pub fn decode(bytes: &[u8]) -> AppResult<DecodedExport> {
    if bytes.starts_with(&GZIP_MAGIC) {
        read_csv(MultiGzDecoder::new(bytes))
    } else {
        read_csv(bytes)
    }
}

// private

fn read_csv(source: impl Read) -> AppResult<DecodedExport> {
    // Short or long rows are tolerated, missing cells just read as absent.
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);

    let header = reader.headers().map_err(Error::Decode)?;
    let header = Arc::new(Header::new(header.iter().map(str::trim)));

    let items = reader
        .records()
        .map(|record| {
            record
                .map(|values| RawLineItem::new(Arc::clone(&header), values))
                .map_err(Error::Decode)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedExport { header, items })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    const CSV: &str = "identity_time_interval,line_item_unblended_cost,resource_tags\n\
                       2024-05-01T00:00:00Z/2024-05-02T00:00:00Z,1.5,\"{\"\"user_client\"\":\"\"a\"\"}\"\n\
                       2024-05-02T00:00:00Z/2024-05-03T00:00:00Z,,\n";

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decodes_gzip_and_plain_the_same() {
        let zipped = decode(&gzip(CSV)).unwrap();
        let plain = decode(CSV.as_bytes()).unwrap();

        assert_eq!(zipped.items.len(), 2);
        assert_eq!(plain.items.len(), 2);
        assert_eq!(zipped.header, plain.header);

        let first = &zipped.items[0];
        assert_eq!(first.get("line_item_unblended_cost"), Some("1.5"));
        assert_eq!(first.get("resource_tags"), Some(r#"{"user_client":"a"}"#));
        assert_eq!(zipped.items[1].get("resource_tags"), None);
    }

    #[test]
    fn short_rows_read_as_absent_cells() {
        let export = decode(b"a,b,c\n1,2\n").unwrap();

        assert_eq!(export.items[0].get("a"), Some("1"));
        assert_eq!(export.items[0].get("c"), None);
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let corrupt = [0x1f, 0x8b, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef];

        assert!(decode(&corrupt).is_err());
    }
}
