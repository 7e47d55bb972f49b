//! End-to-end demo: decode a handcrafted multipart body and store the file
//! part on disk.
//!
//! Run with `cargo run --example disk_upload`.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::once;
use uploadify::{DiskStorage, FilesOutcome, Limits, Uploadify};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let upload = Uploadify::builder()
        .storage(DiskStorage::new(dir.path())?)
        .limits(Limits::new().file_size(1024 * 1024).files(1))
        .build();

    let body = "--X-BOUNDARY\r\n\
                Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
                my upload\r\n\
                --X-BOUNDARY\r\n\
                Content-Disposition: form-data; name=\"msg\"; filename=\"hello.txt\"\r\n\
                Content-Type: text/plain\r\n\r\n\
                Hello Disk\r\n\
                --X-BOUNDARY--\r\n";
    let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(body)) });

    let report = upload.single("msg").dispatch(stream, "X-BOUNDARY").await;

    println!("body: {:?}", report.body);
    if let FilesOutcome::Single(Some(file)) = &report.files {
        println!("stored {} bytes as {:?}", file.size, file.stored);
    }
    for notification in &report.notifications {
        println!("notification: {} {}", notification.code.as_str(), notification.message);
    }

    Ok(())
}
