use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::info;

/// Serializes `value` to JSON, gzip-compressed when `gzip` is set.
pub fn encode_json(value: &impl Serialize, gzip: bool) -> anyhow::Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    if !gzip {
        return Ok(body);
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(&body)?;
    Ok(encoder.finish()?)
}

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
///
/// With `gzip`, the body is compressed and tagged `Content-Encoding: gzip`.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
    gzip: bool,
) -> anyhow::Result<()> {
    let body = encode_json(value, gzip)?;
    let size = body.len();

    let mut request = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json");
    if gzip {
        request = request.content_encoding("gzip");
    }
    request.send().await?;

    info!(bucket, key, size, gzip, "Uploaded chart series");
    Ok(())
}
