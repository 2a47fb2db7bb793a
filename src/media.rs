//! Image transcoding and `data:` URIs.

use base64::{
    engine::general_purpose::STANDARD, write::EncoderStringWriter, Engine,
};
use clap::ValueEnum;
use eyre::{ensure, eyre, Result, WrapErr};
use image::{io::Reader as ImageReader, DynamicImage, ImageOutputFormat};
use std::{
    fmt,
    io::{Cursor, Write},
};
use url::Url;

/// Bytes encoded at once when building a `data:` URI.
const CHUNK_SIZE: usize = 0x8000;

/// JPEG encoding quality.
const JPEG_QUALITY: u8 = 90;

/// Raster format the covers are re-encoded to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum TargetFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG, quality 90.
    Jpeg,
    /// Lossless WebP.
    Webp,
}

impl TargetFormat {
    /// Returns the file extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// Returns the MIME type.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Decodes an image (whatever its format) and re-encodes it as `format`.
pub fn transcode(bytes: &[u8], format: TargetFormat) -> Result<Vec<u8>> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("determine image format")?
        .decode()
        .context("decode image")?;

    encode(&image, format).with_context(|| format!("encode as {format}"))
}

fn encode(image: &DynamicImage, format: TargetFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    match format {
        TargetFormat::Png => {
            image.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
        },
        TargetFormat::Jpeg => {
            // No alpha channel in JPEG.
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(
                &mut Cursor::new(&mut buf),
                ImageOutputFormat::Jpeg(JPEG_QUALITY),
            )?;
        },
        TargetFormat::Webp => {
            let image = DynamicImage::ImageRgba8(image.to_rgba8());
            let encoder = webp::Encoder::from_image(&image)
                .map_err(|err| eyre!("prepare WebP encoder: {err}"))?;
            buf.extend_from_slice(&encoder.encode_lossless());
        },
    }

    Ok(buf)
}

/// Encodes `bytes` as a base64 `data:` URI.
pub fn to_data_uri(bytes: &[u8], mime_type: &str) -> Result<String> {
    let prefix = format!("data:{mime_type};base64,");
    let mut writer = EncoderStringWriter::from_consumer(prefix, &STANDARD);

    for chunk in bytes.chunks(CHUNK_SIZE) {
        writer.write_all(chunk).context("encode data URI chunk")?;
    }

    Ok(writer.into_inner())
}

/// Extracts the bytes of a base64 `data:` URI.
pub fn from_data_uri(uri: &str) -> Result<Vec<u8>> {
    let (header, data) = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| eyre!("malformed data URI"))?;
    ensure!(
        header.ends_with(";base64"),
        "unsupported data URI encoding `{header}`"
    );

    STANDARD.decode(data).context("decode base64 data")
}

/// Guesses the file extension of an image from its URL.
///
/// Only PNG and WebP are recognized, everything else is assumed to be JPEG
/// (CDN URLs often carry no extension at all).
pub fn extension_from_url(url: &str) -> &'static str {
    let path = Url::parse(url).map_or_else(
        |_| url.split(['?', '#']).next().unwrap_or_default().to_owned(),
        |url| url.path().to_owned(),
    );
    let path = path.to_ascii_lowercase();

    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let image = RgbaImage::from_pixel(3, 2, Rgba([255, 36, 66, 128]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .expect("encode PNG");
        buf
    }

    fn webp_bytes() -> Vec<u8> {
        let image =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 128, 255])));
        let encoder = webp::Encoder::from_image(&image).expect("encoder");
        encoder.encode(90.0).to_vec()
    }

    #[test]
    fn webp_to_png() {
        let res = transcode(&webp_bytes(), TargetFormat::Png).expect("PNG");

        assert_eq!(image::guess_format(&res).expect("format"), ImageFormat::Png);
        let image = image::load_from_memory(&res).expect("decode");
        assert_eq!((image.width(), image.height()), (4, 4));
    }

    #[test]
    fn png_to_jpeg() {
        let res = transcode(&png_bytes(), TargetFormat::Jpeg).expect("JPEG");

        assert_eq!(image::guess_format(&res).expect("format"), ImageFormat::Jpeg);
        let image = image::load_from_memory(&res).expect("decode");
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn png_to_webp() {
        let res = transcode(&png_bytes(), TargetFormat::Webp).expect("WebP");

        assert_eq!(image::guess_format(&res).expect("format"), ImageFormat::WebP);
    }

    #[test]
    fn corrupted_image() {
        assert!(transcode(b"definitely not an image", TargetFormat::Png).is_err());
    }

    #[test]
    fn data_uri() {
        // Larger than a chunk, and not a multiple of 3.
        let bytes = (0..CHUNK_SIZE * 2 + 7)
            .map(|i| (i % 251) as u8)
            .collect::<Vec<_>>();

        let uri = to_data_uri(&bytes, "image/png").expect("data URI");

        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(uri["data:image/png;base64,".len()..], STANDARD.encode(&bytes));
        assert_eq!(from_data_uri(&uri).expect("decode"), bytes);
    }

    #[test]
    fn invalid_data_uri() {
        assert!(from_data_uri("https://x/a.png").is_err());
        assert!(from_data_uri("data:text/plain,hello").is_err());
        assert!(from_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn extension() {
        assert_eq!(extension_from_url("https://cdn/x?traceId=123"), "jpg");
        assert_eq!(extension_from_url("https://cdn/x.PNG?w=100"), "png");
        assert_eq!(extension_from_url("https://cdn/a/b.webp"), "webp");
        assert_eq!(extension_from_url("https://cdn/a/b.jpeg"), "jpg");
        assert_eq!(extension_from_url("covers/a.webp?x=.png"), "webp");
    }
}
