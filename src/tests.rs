use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
use poem::http::{header, StatusCode};
use poem::test::TestClient;
use poem::{Endpoint, EndpointExt};
use tempfile::TempDir;

use crate::cache::VariantCache;
use crate::config::RuntimeConfig;
use crate::controller::CdnService;
use crate::error::CdnResult;
use crate::processor::{ImageTranscoder, TranscodeRequest, Transcoder};
use crate::response::VARIANT_CACHE_CONTROL;

const TEST_KEY: &str = "s3cr3t";

/// The real codec, counting how often it is asked to work.
struct CountingImageTranscoder {
    inner: ImageTranscoder,
    calls: AtomicUsize,
}

#[async_trait]
impl Transcoder for CountingImageTranscoder {
    async fn transcode(&self, original: Bytes, request: TranscodeRequest) -> CdnResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.transcode(original, request).await
    }
}

struct Environment {
    dir: TempDir,
    client: TestClient<Box<dyn Endpoint<Output = poem::Response>>>,
    transcoder: Arc<CountingImageTranscoder>,
}

async fn setup_environment(extra: &str) -> anyhow::Result<Environment> {
    let dir = TempDir::new()?;
    let yaml = format!(
        "backend:\n  filesystem:\n    directory: {:?}\n{}",
        dir.path(),
        extra
    );
    let config = Arc::new(RuntimeConfig::from_yaml(&yaml)?);
    let backends = config.backend.connect().await?;

    let transcoder = Arc::new(CountingImageTranscoder {
        inner: ImageTranscoder::new(FilterType::Triangle),
        calls: AtomicUsize::new(0),
    });

    let cache = VariantCache::new(
        backends.originals.clone(),
        backends.variants,
        transcoder.clone(),
        config.cache_size,
    );
    let service = CdnService::new(config, backends.originals, cache);

    let app = crate::routes::build_app(Arc::new(service)).boxed();
    Ok(Environment {
        dir,
        client: TestClient::new(app),
        transcoder,
    })
}

fn test_image(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
    });

    let mut buff = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buff, ImageOutputFormat::Png)
        .unwrap();
    buff.into_inner()
}

async fn upload(env: &Environment, data: Vec<u8>) -> String {
    let res = env
        .client
        .post("/v1/images")
        .header("Authorization", format!("Bearer {}", TEST_KEY))
        .content_type("image/png")
        .body(data)
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    let info = res.json().await;
    info.value()
        .object()
        .get("data")
        .object()
        .get("image_id")
        .string()
        .to_string()
}

fn keyed_config() -> String {
    format!("upload:\n  private_key: {:?}\n", TEST_KEY)
}

#[tokio::test]
async fn test_upload_and_retrieve_resized_webp() -> anyhow::Result<()> {
    let env = setup_environment(&keyed_config()).await?;
    let image_id = upload(&env, test_image(1000, 600)).await;

    let res = env
        .client
        .get(format!("/v1/images/{}", image_id))
        .query("w", &"500")
        .query("q", &"80")
        .query("f", &"webp")
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    res.assert_content_type("image/webp");
    let cache_control = res
        .0
        .headers()
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok());
    assert_eq!(cache_control, Some(VARIANT_CACHE_CONTROL));
    let first = res.0.into_body().into_vec().await?;

    let decoded = image::load_from_memory(&first)?;
    assert_eq!(decoded.dimensions(), (500, 300));

    let stored = env
        .dir
        .path()
        .join("variants")
        .join(&image_id)
        .join(format!("{}_w500_q80.webp", image_id));
    assert!(stored.exists(), "variant missing at {:?}", stored);
    assert_eq!(env.transcoder.calls.load(Ordering::SeqCst), 1);

    // The format falls back to webp so this lands on the same key.
    let res = env
        .client
        .get(format!("/v1/images/{}", image_id))
        .query("w", &"500")
        .query("q", &"80")
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    let second = res.0.into_body().into_vec().await?;
    assert_eq!(first, second);
    assert_eq!(env.transcoder.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_wider_than_original_is_reencoded_not_upscaled() -> anyhow::Result<()> {
    let env = setup_environment(&keyed_config()).await?;
    let image_id = upload(&env, test_image(120, 80)).await;

    let res = env
        .client
        .get(format!("/v1/images/{}", image_id))
        .query("w", &"1500")
        .query("f", &"jpeg")
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    res.assert_content_type("image/jpeg");
    let body = res.0.into_body().into_vec().await?;
    assert_eq!(image::load_from_memory(&body)?.dimensions(), (120, 80));

    let stored = env
        .dir
        .path()
        .join("variants")
        .join(&image_id)
        .join(format!("{}_w1500_q80.jpeg", image_id));
    assert!(stored.exists());
    Ok(())
}

#[tokio::test]
async fn test_upload_requires_bearer_token() -> anyhow::Result<()> {
    let env = setup_environment(&keyed_config()).await?;

    let res = env
        .client
        .post("/v1/images")
        .content_type("image/png")
        .body(test_image(10, 10))
        .send()
        .await;
    res.assert_status(StatusCode::UNAUTHORIZED);

    let res = env
        .client
        .post("/v1/images")
        .header("Authorization", "Bearer wrong")
        .content_type("image/png")
        .body(test_image(10, 10))
        .send()
        .await;
    res.assert_status(StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_open_upload_without_private_key() -> anyhow::Result<()> {
    let env = setup_environment("").await?;

    let res = env
        .client
        .post("/v1/images")
        .content_type("image/png")
        .body(test_image(10, 10))
        .send()
        .await;
    res.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_error_statuses() -> anyhow::Result<()> {
    let env = setup_environment(&keyed_config()).await?;
    let image_id = upload(&env, test_image(20, 20)).await;

    let res = env
        .client
        .get(format!("/v1/images/{}", image_id))
        .query("f", &"tiff")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let res = env
        .client
        .get(format!("/v1/images/{}", image_id))
        .query("w", &"wide")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let res = env.client.get("/v1/images/0123456789abcdef").send().await;
    res.assert_status(StatusCode::NOT_FOUND);

    let res = env
        .client
        .post("/v1/images")
        .header("Authorization", format!("Bearer {}", TEST_KEY))
        .content_type("text/plain")
        .query("ext", &"png")
        .body("hello")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(env.transcoder.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_upload_returns_serving_links() -> anyhow::Result<()> {
    let env = setup_environment("public_url: \"https://cdn.example.com/\"\n").await?;

    let res = env
        .client
        .post("/v1/images")
        .content_type("image/png")
        .body(test_image(10, 10))
        .send()
        .await;
    res.assert_status(StatusCode::OK);

    let info = res.json().await;
    let data = info.value().object().get("data").object();
    let url = format!(
        "https://cdn.example.com/v1/images/{}",
        data.get("image_id").string()
    );
    data.get("url").assert_string(&url);
    data.get("usage")
        .object()
        .get("resize")
        .assert_string(&format!("{}?w=500", url));

    let env = setup_environment("").await?;
    let res = env
        .client
        .post("/v1/images")
        .header("Host", "img.local:8000")
        .content_type("image/png")
        .body(test_image(10, 10))
        .send()
        .await;
    res.assert_status(StatusCode::OK);

    let info = res.json().await;
    let data = info.value().object().get("data").object();
    let url = format!("http://img.local:8000/v1/images/{}", data.get("image_id").string());
    data.get("url").assert_string(&url);
    Ok(())
}
