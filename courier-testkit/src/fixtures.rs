use courier::*;
use std::path::PathBuf;

/// Small inline JPEG-ish payload stamped at `created_at_ms`.
pub fn photo(name: &str, created_at_ms: i64) -> NewItem {
    NewItem::new(
        name,
        "image/jpeg",
        Payload::Inline {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
        },
    )
    .with_created_at_ms(created_at_ms)
    .with_location(37.7749, -122.4194)
}

/// File payload referenced by path.
pub fn document(name: &str, created_at_ms: i64) -> NewItem {
    NewItem::new(
        name,
        "application/pdf",
        Payload::Path {
            path: PathBuf::from(format!("/data/file_uploads/{name}")),
        },
    )
    .with_file_size(2_048)
    .with_created_at_ms(created_at_ms)
}

/// Insert `count` photos with increasing creation times.
pub async fn seed_photos(
    store: &dyn RecordStore,
    count: usize,
) -> anyhow::Result<Vec<ItemId>> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("IMG_{:04}.jpg", i + 1);
        ids.push(store.insert(photo(&name, 1_000 + i as i64)).await?);
    }
    Ok(ids)
}
