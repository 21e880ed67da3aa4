//! Region dump integration tests.
//!
//! Tests verify:
//! - Whole images and regions are written pixel-exact as PNG
//! - JPEG output and protocol selection
//! - Annotation zones dump the window bounding their geometry
//! - Destination patterns and directory creation
//! - Failures never leave partial files

use sldc_cytomine::tile::codec::decode_rgb;
use sldc_cytomine::{
    dump_region, Annotation, CacheConfig, DumpRequest, DumpZone, Region, ServerGeneration,
    SlideError, TileError, TileProtocol,
};

use super::test_utils::{assert_region, MockImage, MockServer};

const CURRENT: u64 = 301;
const LEGACY: u64 = 302;
const ZONE: u64 = 4401;

async fn start_server() -> MockServer {
    MockServer::start_with_annotations(
        vec![
            MockImage::current(CURRENT, 1200, 800, 3),
            MockImage::legacy(LEGACY, 1000, 600, 2),
        ],
        // x 200..600, y 200..400 from the top once flipped
        vec![Annotation {
            id: ZONE,
            image: CURRENT,
            location: "POLYGON ((200 600, 600 600, 600 400, 200 400, 200 600))".to_string(),
        }],
    )
    .await
}

// =============================================================================
// Successful Dumps
// =============================================================================

#[tokio::test]
async fn test_dump_whole_image_at_zoom_level() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("whole.png");

    let mut request = DumpRequest::new(CURRENT, destination.to_string_lossy());
    request.zoom_level = 2;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!(outcome.path, destination);
    assert_eq!(outcome.generation, ServerGeneration::Current);
    assert_eq!(outcome.protocol, TileProtocol::Iip);
    assert_eq!(
        outcome.region,
        Region {
            x: 0,
            y: 0,
            width: 300,
            height: 200
        }
    );
    assert_eq!(outcome.native_tiles, 2);

    let image = decode_rgb(&std::fs::read(&destination).unwrap()).unwrap();
    assert_eq!(image.dimensions(), (300, 200));
    assert_region(&image, 2, 0, 0);
}

#[tokio::test]
async fn test_dump_region_of_legacy_image() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("region.png");

    let zone = DumpZone::Region {
        image_id: LEGACY,
        region: Region {
            x: 200,
            y: 100,
            width: 500,
            height: 300,
        },
    };
    let mut request = DumpRequest::new(zone, destination.to_string_lossy());
    request.jobs = 2;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!(outcome.generation, ServerGeneration::Legacy);
    assert_eq!(outcome.protocol, TileProtocol::Zoomify);
    // Columns 0-2, rows 0-1
    assert_eq!(outcome.native_tiles, 6);
    assert_eq!(outcome.cache.misses, 6);
    assert_eq!(server.state.zoomify_requests(), 6);

    let image = decode_rgb(&std::fs::read(&destination).unwrap()).unwrap();
    assert_eq!(image.dimensions(), (500, 300));
    assert_region(&image, 0, 200, 100);
}

#[tokio::test]
async fn test_region_is_clipped_to_the_view() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("clipped.png");

    let zone = DumpZone::Region {
        image_id: CURRENT,
        region: Region {
            x: 500,
            y: 300,
            width: 1000,
            height: 1000,
        },
    };
    let mut request = DumpRequest::new(zone, destination.to_string_lossy());
    request.zoom_level = 1;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!((outcome.region.width, outcome.region.height), (100, 100));
    let image = decode_rgb(&std::fs::read(&destination).unwrap()).unwrap();
    assert_region(&image, 1, 500, 300);
}

#[tokio::test]
async fn test_forced_window_protocol_and_jpeg_output() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("window.jpg");

    let zone = DumpZone::Region {
        image_id: CURRENT,
        region: Region {
            x: 0,
            y: 0,
            width: 256,
            height: 256,
        },
    };
    let mut request = DumpRequest::new(zone, destination.to_string_lossy());
    request.protocol = Some(TileProtocol::Window);
    request.quality = 80;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!(outcome.protocol, TileProtocol::Window);
    assert_eq!(server.state.window_requests(), 1);
    assert_eq!(server.state.iip_requests(), 0);

    let data = std::fs::read(&destination).unwrap();
    assert_eq!(&data[..2], &[0xFF, 0xD8]);
    assert_eq!(decode_rgb(&data).unwrap().dimensions(), (256, 256));
}

#[tokio::test]
async fn test_auto_detection_skips_iip_serving_html() {
    let server = start_server().await;
    server.state.serve_html_from_iip(true);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("fallback.png");

    let mut request = DumpRequest::new(CURRENT, destination.to_string_lossy());
    request.zoom_level = 3;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!(outcome.protocol, TileProtocol::Zoomify);
    // Only the detection request went to IIP
    assert_eq!(server.state.iip_requests(), 1);
    assert_eq!(server.state.zoomify_requests(), 1);

    let image = decode_rgb(&std::fs::read(&destination).unwrap()).unwrap();
    assert_eq!(image.dimensions(), (150, 100));
    assert_region(&image, 3, 0, 0);
}

#[tokio::test]
async fn test_dump_annotation_zone() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let pattern = format!("{}/{{image}}/{{id}}.png", dir.path().display());

    let mut request = DumpRequest::new(
        DumpZone::Annotation {
            annotation_id: ZONE,
        },
        pattern,
    );
    request.zoom_level = 1;
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    assert_eq!(outcome.image_id, CURRENT);
    assert_eq!(outcome.annotation_id, Some(ZONE));
    assert_eq!(
        outcome.region,
        Region {
            x: 100,
            y: 100,
            width: 200,
            height: 100
        }
    );
    let expected = dir
        .path()
        .join(CURRENT.to_string())
        .join(format!("{}.png", ZONE));
    assert_eq!(outcome.path, expected);

    let image = decode_rgb(&std::fs::read(&expected).unwrap()).unwrap();
    assert_eq!(image.dimensions(), (200, 100));
    assert_region(&image, 1, 100, 100);
}

#[tokio::test]
async fn test_pattern_creates_directories() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let pattern = format!(
        "{}/{{id}}/z{{zoom}}/{{originalFilename}}.png",
        dir.path().display()
    );

    let mut request = DumpRequest::new(CURRENT, pattern);
    request.zoom_level = 3;
    request.cache = CacheConfig::entries(1);
    let outcome = dump_region(&server.client(), &request).await.unwrap();

    let expected = dir
        .path()
        .join(CURRENT.to_string())
        .join("z3")
        .join(format!("slide-{}.svs.png", CURRENT));
    assert_eq!(outcome.path, expected);
    assert!(expected.is_file());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_unsupported_extension() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("slide.tif");

    let request = DumpRequest::new(CURRENT, destination.to_string_lossy());
    let err = dump_region(&server.client(), &request).await.unwrap_err();

    assert!(matches!(err, TileError::EncodeError { .. }));
    assert_eq!(server.state.tile_requests(), 0);
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_region_outside_view() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();

    let zone = DumpZone::Region {
        image_id: CURRENT,
        region: Region {
            x: 400,
            y: 0,
            width: 10,
            height: 10,
        },
    };
    let mut request = DumpRequest::new(zone, dir.path().join("x.png").to_string_lossy());
    request.zoom_level = 2;
    let err = dump_region(&server.client(), &request).await.unwrap_err();
    assert!(matches!(
        err,
        TileError::Slide(SlideError::WindowOutOfBounds { .. })
    ));
}

#[tokio::test]
async fn test_invalid_zoom_level() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();

    let mut request = DumpRequest::new(CURRENT, dir.path().join("x.png").to_string_lossy());
    request.zoom_level = 7;
    let err = dump_region(&server.client(), &request).await.unwrap_err();
    assert!(matches!(
        err,
        TileError::Slide(SlideError::InvalidZoomLevel {
            requested: 7,
            max: 3
        })
    ));
}

#[tokio::test]
async fn test_tile_failure_leaves_no_file() {
    let server = start_server().await;
    server.state.fail_tiles(503);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("failed.png");

    let mut request = DumpRequest::new(LEGACY, destination.to_string_lossy());
    request.protocol = Some(TileProtocol::Zoomify);
    let err = dump_region(&server.client(), &request).await.unwrap_err();

    assert!(matches!(err, TileError::Fetch(ref e) if e.is_transient()));
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_missing_annotation() {
    let server = start_server().await;
    let request = DumpRequest::new(DumpZone::Annotation { annotation_id: 7 }, "never.png");

    let err = dump_region(&server.client(), &request).await.unwrap_err();
    assert!(matches!(
        err,
        TileError::Slide(SlideError::AnnotationNotFound(7))
    ));
    assert_eq!(server.state.instance_requests(), 0);
}

#[tokio::test]
async fn test_missing_image() {
    let server = start_server().await;
    let request = DumpRequest::new(999, "never.png");

    let err = dump_region(&server.client(), &request).await.unwrap_err();
    assert!(matches!(err, TileError::Slide(SlideError::NotFound(999))));
}
