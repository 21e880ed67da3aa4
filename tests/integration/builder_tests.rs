//! Tile assembly integration tests.
//!
//! Tests verify:
//! - Tiling a whole view reproduces its pixels exactly
//! - Overlapping tiles download each native tile once
//! - Windows shift tile coordinates
//! - Fetch failures surface through tile images

use std::collections::HashSet;
use std::time::Duration;

use sldc_cytomine::{CacheConfig, TileBuilder, TileCache, TileError, TileIdentity};

use super::test_utils::{assert_region, current_slide, TrackingProvider};

// =============================================================================
// Whole View Tiling
// =============================================================================

#[tokio::test]
async fn test_tiling_reproduces_the_view() {
    // 1400x1000 at full resolution, 700x500 at zoom level 1
    let slide = current_slide(11, 1400, 1000, 3);
    let window = slide.view(1).unwrap().full_window();

    let provider = TrackingProvider::new();
    let builder = TileBuilder::new(TileCache::new(provider.clone())).with_jobs(3);
    let tiles = builder.build_all(&window, 300, 300, 40).unwrap();

    // Steps of 260 pixels: 3 columns, 2 rows
    assert_eq!(tiles.len(), 6);
    for (expected_index, tile) in tiles.iter().enumerate() {
        assert_eq!(tile.index(), Some(expected_index as u32));
        let image = tile.image().await.unwrap();
        assert_eq!(image.dimensions(), (tile.width(), tile.height()));
        assert_region(&image, 1, tile.identity().x(), tile.identity().y());
    }

    // 700x500 is covered by 3x2 native tiles, each downloaded once
    let requests = provider.get_requests().await;
    let distinct: HashSet<TileIdentity> = requests.iter().copied().collect();
    assert_eq!(distinct.len(), 6);
    assert_eq!(requests.len(), distinct.len());
    assert_eq!(builder.cache().stats().misses, 6);
}

#[tokio::test]
async fn test_concurrent_tiles_share_native_downloads() {
    let slide = current_slide(12, 1024, 1024, 2);
    let window = slide.view(0).unwrap().full_window();

    let provider = TrackingProvider::new().with_delay(Duration::from_millis(20));
    let builder = TileBuilder::new(TileCache::new(provider.clone()));
    let tiles = builder.build_all(&window, 200, 200, 50).unwrap();

    let handles: Vec<_> = tiles
        .into_iter()
        .map(|tile| tokio::spawn(async move { tile.image().await.map(|image| image.dimensions()) }))
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 1024x1024 holds 16 native tiles
    assert_eq!(provider.fetch_count(), 16);
}

#[tokio::test]
async fn test_edge_tiles_are_clipped() {
    let slide = current_slide(13, 600, 300, 1);
    let window = slide.view(0).unwrap().full_window();

    let builder = TileBuilder::new(TileCache::new(TrackingProvider::new()));
    let tiles = builder.build_all(&window, 256, 256, 0).unwrap();

    let sizes: Vec<(u32, u32)> = tiles.iter().map(|t| (t.width(), t.height())).collect();
    assert_eq!(
        sizes,
        vec![(256, 256), (256, 256), (88, 256), (256, 44), (256, 44), (88, 44)]
    );

    let corner = tiles.last().unwrap();
    assert_eq!(corner.native_identities().len(), 1);
    let image = corner.image().await.unwrap();
    assert_region(&image, 0, 512, 256);
}

// =============================================================================
// Windows
// =============================================================================

#[tokio::test]
async fn test_window_offsets_tiles() {
    let slide = current_slide(14, 2048, 2048, 3);
    let view = slide.view(0).unwrap();
    let window = view.window(300, 700, 500, 400).unwrap();

    let builder = TileBuilder::new(TileCache::new(TrackingProvider::new()));
    let tiles = builder.build_all(&window, 256, 256, 0).unwrap();
    assert_eq!(tiles.len(), 4);

    let second = &tiles[1];
    assert_eq!(second.identity().x(), 556);
    assert_eq!(second.identity().y(), 700);
    assert_eq!(second.width(), 244);

    let image = second.image().await.unwrap();
    assert_region(&image, 0, 556, 700);
}

#[tokio::test]
async fn test_tile_outside_window_is_rejected() {
    let slide = current_slide(15, 1000, 1000, 2);
    let window = slide.view(0).unwrap().window(0, 0, 300, 300).unwrap();
    let builder = TileBuilder::new(TileCache::new(TrackingProvider::new()));

    assert!(matches!(
        builder.build(&window, 200, 0, 200, 100),
        Err(TileError::InvalidRegion { .. })
    ));
    assert!(matches!(
        builder.build_all(&window, 100, 100, 100),
        Err(TileError::InvalidRegion { .. })
    ));
}

// =============================================================================
// Failures and Parallelism
// =============================================================================

#[tokio::test]
async fn test_fetch_failure_fails_the_tile() {
    let slide = current_slide(16, 512, 512, 1);
    let window = slide.view(0).unwrap().full_window();

    let provider = TrackingProvider::new().failing_slide(16);
    let builder = TileBuilder::new(TileCache::new(provider));
    let tile = builder.build(&window, 100, 100, 300, 300).unwrap();

    let err = tile.image().await.unwrap_err();
    assert!(matches!(err, TileError::Fetch(_)));
    assert!(builder.cache().is_empty());
}

#[tokio::test]
async fn test_jobs_do_not_change_pixels() {
    let slide = current_slide(17, 900, 900, 2);
    let window = slide.view(0).unwrap().full_window();

    let sequential = TileBuilder::new(TileCache::new(TrackingProvider::new())).with_jobs(1);
    let parallel = TileBuilder::new(
        TileCache::with_config(TrackingProvider::new(), CacheConfig::entries(2)).unwrap(),
    )
    .with_jobs(16);

    let a = sequential
        .build(&window, 10, 20, 800, 700)
        .unwrap()
        .image()
        .await
        .unwrap();
    let b = parallel
        .build(&window, 10, 20, 800, 700)
        .unwrap()
        .image()
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_region(&a, 0, 10, 20);
}
