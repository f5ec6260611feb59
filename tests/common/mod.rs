//! Shared fixtures for integration tests: generated images and a local HTTP server

#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use imgly_classify::{PipelineConfig, StaticSearch};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const FOREST: [u8; 3] = [30, 140, 40];
pub const BIRD: [u8; 3] = [200, 60, 40];

/// Solid image with a little per-index variation so files differ
pub fn colour_image(colour: [u8; 3], index: u8, width: u32, height: u32) -> RgbImage {
    let jitter = index.wrapping_mul(3) % 30;
    RgbImage::from_fn(width, height, |x, y| {
        let stripe = if (x + y) % 7 == 0 { 10 } else { 0 };
        Rgb([
            colour[0].saturating_add(jitter).saturating_sub(stripe),
            colour[1].saturating_sub(jitter / 2).saturating_add(stripe),
            colour[2].saturating_add(jitter / 3),
        ])
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}

/// Write `count` images of `colour` into `root/label`
pub fn write_category(root: &Path, label: &str, colour: [u8; 3], count: u8) {
    let dir = root.join(label);
    std::fs::create_dir_all(&dir).expect("create category dir");
    for i in 0..count {
        colour_image(colour, i, 24, 24)
            .save(dir.join(format!("{label}_{i:02}.png")))
            .expect("save image");
    }
}

/// Minimal HTTP/1.1 server answering GET requests from a fixed route table
pub struct TestServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let routes = Arc::new(routes);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    let _ = serve(stream, &routes).await;
                });
            }
        });

        Self { addr, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: &HashMap<String, Vec<u8>>) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        request.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&request);
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    match routes.get(&path) {
        Some(body) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).await?;
            stream.write_all(body).await?;
        },
        None => {
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
        },
    }
    stream.shutdown().await
}

/// Routes and search results for a two-category dataset
///
/// Each category gets `good` decodable PNGs of 64x48 pixels, one undecodable
/// `.jpg` and one URL that answers 404.
pub struct ServedDataset {
    pub server: TestServer,
    pub search: StaticSearch,
}

pub async fn serve_dataset(config: &PipelineConfig, good: u8) -> ServedDataset {
    let palette = [FOREST, BIRD];
    let mut routes = HashMap::new();
    let mut paths_by_category = Vec::new();

    for (category_index, category) in config.categories.iter().enumerate() {
        let colour = palette[category_index % palette.len()];
        let mut paths = Vec::new();
        for i in 0..good {
            let path = format!("/{category}/{i}.png");
            routes.insert(path.clone(), png_bytes(&colour_image(colour, i, 64, 48)));
            paths.push(path);
        }
        let broken = format!("/{category}/broken.jpg");
        routes.insert(broken.clone(), b"<html>not an image</html>".to_vec());
        paths.push(broken);
        paths.push(format!("/{category}/missing.png"));
        paths_by_category.push((category.clone(), paths));
    }

    let server = TestServer::start(routes).await;
    let mut search = StaticSearch::default();
    for (category, paths) in paths_by_category {
        let urls = paths.iter().map(|p| server.url(p)).collect();
        search = search.with_term(config.query_for(&category), urls);
    }

    ServedDataset { server, search }
}

/// Configuration tuned for fast offline tests
pub fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .dataset_root(root)
        .categories(["forest", "bird"])
        .images_per_category(20)
        .max_image_size(32)
        .throttle_secs(0)
        .download_timeout_secs(5)
        .resize_px(32)
        .batch_size(4)
        .build()
        .expect("valid test config")
}
