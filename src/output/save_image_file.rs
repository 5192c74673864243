// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/output/save_image_file.rs - 保存预览图像文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, draw::Draw, draw::FontError},
};

/// 把最新的预览帧写到固定文件，前台每次刷新覆盖一次
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  /// `image:///tmp/preview.png?font=/usr/share/fonts/DejaVuSans.ttf`
  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut draw = Draw::default();
    if let Some((_, font)) = uri.query_pairs().find(|(k, _)| k == "font") {
      draw = draw.with_font_file(Path::new(font.as_ref()))?;
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    debug!("保存预览到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<RgbImage, usize> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, preview: &RgbImage, queue_length: &usize) -> Result<(), Self::Error> {
    if self.draw.has_font() {
      let mut image = preview.clone();
      self
        .draw
        .draw_banner(&mut image, &format!("Current Queue Length: {}", queue_length));
      self.save_image(&image)
    } else {
      self.save_image(preview)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
      .join(format!("cngqueue-test-{}", std::process::id()))
      .join(name)
  }

  #[test]
  fn writes_preview_file() {
    let path = temp_path("preview.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path.as_path());

    let mut preview = RgbImage::new(8, 4);
    preview.put_pixel(1, 1, image::Rgb([0, 255, 0]));
    output.render_result(&preview, &3).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (8, 4));
    assert_eq!(saved.get_pixel(1, 1).0, [0, 255, 0]);
    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn wrong_scheme() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
