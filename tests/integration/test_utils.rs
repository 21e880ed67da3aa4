//! Test utilities for integration tests.
//!
//! This module provides in-memory fetch providers with request tracking and a
//! mock Cytomine server speaking the core API (images and annotations) and the
//! tile protocols over real HTTP.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use sldc_cytomine::tile::codec;
use sldc_cytomine::{
    Annotation, CytomineClient, FetchError, FetchProvider, ImageInstance, SliceInstance, Slide,
    TileIdentity,
};

// =============================================================================
// Synthetic Pixels
// =============================================================================

/// Color of the pixel at (`x`, `y`) of a view at `zoom_level`.
///
/// Every mock source renders with this function, so assembled tiles can be
/// checked pixel by pixel.
pub fn expected_pixel(zoom_level: u32, x: u32, y: u32) -> Rgb<u8> {
    Rgb([(x % 251) as u8, (y % 241) as u8, (zoom_level * 50 % 256) as u8])
}

/// Render a region of a view.
pub fn render(zoom_level: u32, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |px, py| {
        expected_pixel(zoom_level, x + px, y + py)
    })
}

/// Render a region as PNG.
pub fn render_png(zoom_level: u32, x: u32, y: u32, width: u32, height: u32) -> Bytes {
    let image = render(zoom_level, x, y, width, height);
    codec::encode(&image, ImageFormat::Png, codec::DEFAULT_JPEG_QUALITY)
        .expect("PNG encoding of a synthetic tile")
}

/// Assert that `image` is the region (`x`, `y`) of the view at `zoom_level`.
pub fn assert_region(image: &RgbImage, zoom_level: u32, x: u32, y: u32) {
    for (px, py, pixel) in image.enumerate_pixels() {
        assert_eq!(
            *pixel,
            expected_pixel(zoom_level, x + px, y + py),
            "pixel ({}, {}) of region at ({}, {})",
            px,
            py,
            x,
            y
        );
    }
}

// =============================================================================
// Slide Constructors
// =============================================================================

/// Path of the slide file backing image `id`.
pub fn slide_path(id: u64) -> String {
    format!("/data/{}/slide.svs", id)
}

/// Image instance as served by a current server.
pub fn current_instance(id: u64, width: u32, height: u32, zoom: u32) -> ImageInstance {
    let mut instance = ImageInstance::new(id, width, height);
    instance.zoom = Some(zoom);
    instance.mime = Some("openslide/svs".to_string());
    instance.full_path = Some(slide_path(id));
    instance.original_filename = Some(format!("slide-{}.svs", id));
    instance
}

/// Image instance as served by a legacy server.
pub fn legacy_instance(id: u64, width: u32, height: u32, depth: u32) -> ImageInstance {
    let mut instance = ImageInstance::new(id, width, height);
    instance.depth = Some(depth);
    instance.mime = Some("openslide/svs".to_string());
    instance.full_path = Some(slide_path(id));
    instance.original_filename = Some(format!("legacy-{}.svs", id));
    instance
}

/// An in-memory current-server slide.
pub fn current_slide(id: u64, width: u32, height: u32, zoom: u32) -> Arc<Slide> {
    let slice = SliceInstance {
        image_server_url: "http://ims.invalid".to_string(),
        path: slide_path(id),
        mime: "openslide/svs".to_string(),
    };
    Arc::new(Slide::new(
        current_instance(id, width, height, zoom),
        Some(slice),
    ))
}

// =============================================================================
// In-Memory Fetch Provider with Request Tracking
// =============================================================================

/// A fetch provider rendering synthetic PNG tiles and tracking every request.
///
/// Tiles of slides listed in `failing` fail with a transient error.
pub struct TrackingProvider {
    delay: Duration,
    fetch_count: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<TileIdentity>>>,
    failing: Vec<u64>,
}

impl TrackingProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fetch_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
            failing: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_slide(mut self, slide_id: u64) -> Self {
        self.failing.push(slide_id);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub async fn get_requests(&self) -> Vec<TileIdentity> {
        self.requests.read().await.clone()
    }

    /// Number of fetches issued for `identity`.
    pub async fn count_for(&self, identity: &TileIdentity) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|requested| *requested == identity)
            .count()
    }
}

impl Clone for TrackingProvider {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            fetch_count: Arc::clone(&self.fetch_count),
            requests: Arc::clone(&self.requests),
            failing: self.failing.clone(),
        }
    }
}

#[async_trait]
impl FetchProvider for TrackingProvider {
    async fn fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push(*identity);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&identity.slide_id()) {
            return Err(FetchError::Failure(format!("backend down for {}", identity)));
        }

        Ok(render_png(
            identity.zoom_level(),
            identity.x(),
            identity.y(),
            identity.width(),
            identity.height(),
        ))
    }
}

// =============================================================================
// Mock Cytomine Server
// =============================================================================

/// An image hosted by the mock server.
#[derive(Debug, Clone)]
pub struct MockImage {
    pub instance: ImageInstance,

    /// Whether the image has a reference slice (current server)
    pub has_slice: bool,
}

impl MockImage {
    pub fn current(id: u64, width: u32, height: u32, zoom: u32) -> Self {
        Self {
            instance: current_instance(id, width, height, zoom),
            has_slice: true,
        }
    }

    pub fn legacy(id: u64, width: u32, height: u32, depth: u32) -> Self {
        Self {
            instance: legacy_instance(id, width, height, depth),
            has_slice: false,
        }
    }

    fn max_zoom(&self) -> u32 {
        if self.has_slice {
            self.instance.zoom.unwrap_or(0)
        } else {
            self.instance.depth.unwrap_or(0)
        }
    }

    /// View dimensions at `zoom_level` (0 = full resolution).
    fn view_size(&self, zoom_level: u32) -> (u32, u32) {
        (
            self.instance.width >> zoom_level,
            self.instance.height >> zoom_level,
        )
    }
}

/// Shared state of the mock server.
pub struct MockCytomine {
    base_url: String,
    images: HashMap<u64, MockImage>,
    annotations: HashMap<u64, Annotation>,
    requests: RwLock<Vec<String>>,
    instance_requests: AtomicUsize,
    iip_requests: AtomicUsize,
    zoomify_requests: AtomicUsize,
    window_requests: AtomicUsize,

    /// Status answered by every tile endpoint, 0 to serve normally
    tile_status: AtomicU16,

    /// Status answered by the IIP endpoint only, 0 to serve normally
    iip_status: AtomicU16,

    /// Whether the IIP endpoint answers 200 with an HTML page
    iip_html: AtomicBool,
}

impl MockCytomine {
    /// Answer every tile request with `status` (0 restores normal service).
    pub fn fail_tiles(&self, status: u16) {
        self.tile_status.store(status, Ordering::SeqCst);
    }

    /// Answer IIP tile requests with `status` (0 restores normal service).
    pub fn fail_iip(&self, status: u16) {
        self.iip_status.store(status, Ordering::SeqCst);
    }

    /// Answer IIP tile requests with an HTML page and a 200 status, as an
    /// image server without IIP support behind a web frontend does.
    pub fn serve_html_from_iip(&self, enabled: bool) {
        self.iip_html.store(enabled, Ordering::SeqCst);
    }

    pub fn instance_requests(&self) -> usize {
        self.instance_requests.load(Ordering::SeqCst)
    }

    pub fn iip_requests(&self) -> usize {
        self.iip_requests.load(Ordering::SeqCst)
    }

    pub fn zoomify_requests(&self) -> usize {
        self.zoomify_requests.load(Ordering::SeqCst)
    }

    pub fn window_requests(&self) -> usize {
        self.window_requests.load(Ordering::SeqCst)
    }

    pub fn tile_requests(&self) -> usize {
        self.iip_requests() + self.zoomify_requests() + self.window_requests()
    }

    /// Every request URI received so far.
    pub async fn get_requests(&self) -> Vec<String> {
        self.requests.read().await.clone()
    }

    fn image_by_path(&self, path: &str) -> Option<&MockImage> {
        self.images
            .values()
            .find(|image| image.instance.full_path.as_deref() == Some(path))
    }

    fn injected_status(&self, specific: &AtomicU16) -> Option<StatusCode> {
        [&self.tile_status, specific]
            .into_iter()
            .map(|status| status.load(Ordering::SeqCst))
            .find(|status| *status != 0)
            .and_then(|status| StatusCode::from_u16(status).ok())
    }
}

/// A running mock server, shut down on drop.
pub struct MockServer {
    pub state: Arc<MockCytomine>,
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(images: Vec<MockImage>) -> Self {
        Self::start_with_annotations(images, Vec::new()).await
    }

    pub async fn start_with_annotations(
        images: Vec<MockImage>,
        annotations: Vec<Annotation>,
    ) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let base_url = format!("http://{}", addr);

        let state = Arc::new(MockCytomine {
            base_url: base_url.clone(),
            images: images
                .into_iter()
                .map(|image| (image.instance.id, image))
                .collect(),
            annotations: annotations
                .into_iter()
                .map(|annotation| (annotation.id, annotation))
                .collect(),
            requests: RwLock::new(Vec::new()),
            instance_requests: AtomicUsize::new(0),
            iip_requests: AtomicUsize::new(0),
            zoomify_requests: AtomicUsize::new(0),
            window_requests: AtomicUsize::new(0),
            tile_status: AtomicU16::new(0),
            iip_status: AtomicU16::new(0),
            iip_html: AtomicBool::new(false),
        });

        let router = Router::new()
            .fallback(handle_request)
            .with_state(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock server");
        });

        Self {
            state,
            base_url,
            handle,
        }
    }

    /// A client pointed at this server.
    pub fn client(&self) -> CytomineClient {
        CytomineClient::new(&self.base_url).expect("mock server URL is valid")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// Request Handling
// =============================================================================

async fn handle_request(State(state): State<Arc<MockCytomine>>, uri: Uri) -> Response {
    state.requests.write().await.push(uri.to_string());

    let params: HashMap<String, String> = uri
        .query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let path = uri.path();
    match path {
        "/api/imaging_server.json" => Json(serde_json::json!({
            "collection": [{ "url": state.base_url }]
        }))
        .into_response(),
        "/slice/tile" => iip_tile(&state, &params),
        "/image/tile" => zoomify_tile(&state, &params),
        _ => {
            if let Some(rest) = path.strip_prefix("/api/imageinstance/") {
                image_instance_route(&state, rest, &params)
            } else if let Some(rest) = path.strip_prefix("/api/annotation/") {
                annotation_route(&state, rest)
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
    }
}

fn annotation_route(state: &MockCytomine, rest: &str) -> Response {
    let annotation = rest
        .strip_suffix(".json")
        .and_then(|id| id.parse::<u64>().ok())
        .and_then(|id| state.annotations.get(&id));
    match annotation {
        Some(annotation) => Json(annotation.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn image_instance_route(
    state: &MockCytomine,
    rest: &str,
    params: &HashMap<String, String>,
) -> Response {
    if let Some(id) = rest.strip_suffix(".json").and_then(|id| id.parse::<u64>().ok()) {
        state.instance_requests.fetch_add(1, Ordering::SeqCst);
        return match state.images.get(&id) {
            Some(image) => Json(image.instance.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some((id, tail)) = rest.split_once('/') else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(image) = id.parse::<u64>().ok().and_then(|id| state.images.get(&id)) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if tail == "sliceinstance/reference.json" {
        return if image.has_slice {
            Json(SliceInstance {
                image_server_url: state.base_url.clone(),
                path: slide_path(image.instance.id),
                mime: "openslide/svs".to_string(),
            })
            .into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        };
    }

    match tail
        .strip_prefix("window-")
        .and_then(|window| window.strip_suffix(".png"))
    {
        Some(window) => window_tile(state, image, window, params),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn iip_tile(state: &MockCytomine, params: &HashMap<String, String>) -> Response {
    state.iip_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = state.injected_status(&state.iip_status) {
        return status.into_response();
    }
    if state.iip_html.load(Ordering::SeqCst) {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>IIP is not configured</body></html>",
        )
            .into_response();
    }

    let Some(image) = params.get("fif").and_then(|path| state.image_by_path(path)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (Some(index), Some(z)) = (number(params, "tileIndex"), number(params, "z")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let Some(zoom_level) = image.max_zoom().checked_sub(z) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let (width, _) = image.view_size(zoom_level);
    let cols = width.div_ceil(256);
    native_tile(image, zoom_level, index % cols, index / cols)
}

fn zoomify_tile(state: &MockCytomine, params: &HashMap<String, String>) -> Response {
    state.zoomify_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = state.injected_status(&state.tile_status) {
        return status.into_response();
    }

    let Some(image) = params.get("zoomify").and_then(|path| state.image_by_path(path)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (Some(col), Some(row), Some(z)) =
        (number(params, "x"), number(params, "y"), number(params, "z"))
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match image.max_zoom().checked_sub(z) {
        Some(zoom_level) => native_tile(image, zoom_level, col, row),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn native_tile(image: &MockImage, zoom_level: u32, col: u32, row: u32) -> Response {
    let (width, height) = image.view_size(zoom_level);
    let (x, y) = (col * 256, row * 256);
    if x >= width || y >= height {
        return StatusCode::NOT_FOUND.into_response();
    }
    png_response(render_png(
        zoom_level,
        x,
        y,
        256.min(width - x),
        256.min(height - y),
    ))
}

/// `window` is `{x}-{y}-{w}-{h}` at full resolution.
fn window_tile(
    state: &MockCytomine,
    image: &MockImage,
    window: &str,
    params: &HashMap<String, String>,
) -> Response {
    state.window_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = state.injected_status(&state.tile_status) {
        return status.into_response();
    }

    let values: Vec<u32> = match window.split('-').map(str::parse).collect() {
        Ok(values) => values,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let [x, y, w, h] = values[..] else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if x + w > image.instance.width || y + h > image.instance.height {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let zoom_level = number(params, "zoom").unwrap_or(0);
    png_response(render_png(
        zoom_level,
        x >> zoom_level,
        y >> zoom_level,
        w >> zoom_level,
        h >> zoom_level,
    ))
}

fn number(params: &HashMap<String, String>, name: &str) -> Option<u32> {
    params.get(name).and_then(|value| value.parse().ok())
}

fn png_response(body: Bytes) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], body).into_response()
}
