use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Classic => "4:3",
            AspectRatio::Square => "1:1",
        }
    }

    fn ratio(&self) -> (u32, u32) {
        match self {
            AspectRatio::Wide => (16, 9),
            AspectRatio::Classic => (4, 3),
            AspectRatio::Square => (1, 1),
        }
    }

    /// Display resolutions for this ratio, widest first.
    fn candidates(&self) -> &'static [(u32, u32)] {
        match self {
            AspectRatio::Wide => &[(3840, 2160), (1920, 1080), (960, 540)],
            AspectRatio::Classic => &[(2048, 1536), (1600, 1200), (800, 600)],
            AspectRatio::Square => &[(2048, 2048), (1024, 1024), (512, 512)],
        }
    }
}

/// Which candidate resolution the resample step settles on. SmallestArea is
/// the historical behavior of this tool and stays the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    #[default]
    SmallestArea,
    LargestArea,
}

pub fn pick_resolution(ratio: AspectRatio, policy: ResolutionPolicy) -> (u32, u32) {
    let candidates = ratio.candidates();
    let area = |&&(w, h): &&(u32, u32)| w as u64 * h as u64;
    match policy {
        ResolutionPolicy::SmallestArea => *candidates.iter().min_by_key(area).unwrap(),
        ResolutionPolicy::LargestArea => *candidates.iter().max_by_key(area).unwrap(),
    }
}

/// Center-crop box for `width`×`height` at the target ratio. Whichever
/// dimension is in excess gets trimmed, the excess split symmetrically with
/// the smaller half in front.
pub fn crop_box(width: u32, height: u32, ratio: AspectRatio) -> (u32, u32, u32, u32) {
    let (num, den) = ratio.ratio();
    if width as u64 * den as u64 > height as u64 * num as u64 {
        let new_width = (height as u64 * num as u64 / den as u64) as u32;
        let left = (width - new_width) / 2;
        (left, 0, new_width, height)
    } else {
        let new_height = (width as u64 * den as u64 / num as u64) as u32;
        let top = (height - new_height) / 2;
        (0, top, width, new_height)
    }
}

#[derive(Debug, Clone)]
pub struct ResizedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Crops the source to the target ratio, resamples it to the candidate
/// resolution chosen by `policy` (Lanczos3) and writes the result to
/// `output`. The input file is left untouched.
pub fn resize_and_clip(
    input: &Path,
    output: &Path,
    ratio: AspectRatio,
    policy: ResolutionPolicy,
) -> Result<ResizedImage, PipelineError> {
    let img = image::open(input)?;
    let (x, y, w, h) = crop_box(img.width(), img.height(), ratio);
    let cropped = img.crop_imm(x, y, w, h);

    let (target_w, target_h) = pick_resolution(ratio, policy);
    let resized = cropped.resize_exact(target_w, target_h, FilterType::Lanczos3);
    resized.save(output)?;

    info!(
        "🖼️ Resized {} -> {} ({}x{} cropped to {}x{}, resampled to {}x{})",
        input.display(),
        output.display(),
        img.width(),
        img.height(),
        w,
        h,
        target_w,
        target_h
    );

    Ok(ResizedImage { path: output.to_path_buf(), width: target_w, height: target_h })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wide_source_trims_width_symmetrically() {
        // 4000x2000 at 16:9 keeps the full height and trims width to 3555.
        assert_eq!(crop_box(4000, 2000, AspectRatio::Wide), (222, 0, 3555, 2000));
    }

    #[test]
    fn tall_source_trims_height() {
        // 2000x4000 at 16:9: new height 2000*9/16 = 1125, top offset 1437.
        assert_eq!(crop_box(2000, 4000, AspectRatio::Wide), (0, 1437, 2000, 1125));
    }

    #[test]
    fn exact_ratio_is_untouched() {
        assert_eq!(crop_box(1920, 1080, AspectRatio::Wide), (0, 0, 1920, 1080));
        assert_eq!(crop_box(512, 512, AspectRatio::Square), (0, 0, 512, 512));
    }

    #[test]
    fn default_policy_picks_smallest_candidate() {
        assert_eq!(
            pick_resolution(AspectRatio::Wide, ResolutionPolicy::SmallestArea),
            (960, 540)
        );
        assert_eq!(
            pick_resolution(AspectRatio::Square, ResolutionPolicy::SmallestArea),
            (512, 512)
        );
    }

    #[test]
    fn largest_policy_picks_widest_candidate() {
        assert_eq!(
            pick_resolution(AspectRatio::Wide, ResolutionPolicy::LargestArea),
            (3840, 2160)
        );
        assert_eq!(
            pick_resolution(AspectRatio::Classic, ResolutionPolicy::LargestArea),
            (2048, 1536)
        );
    }

    #[test]
    fn resize_writes_output_and_keeps_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.png");
        let output = dir.path().join("result_0.png");
        image::RgbImage::new(400, 200).save(&input).unwrap();

        let resized =
            resize_and_clip(&input, &output, AspectRatio::Wide, ResolutionPolicy::SmallestArea)
                .unwrap();
        assert_eq!((resized.width, resized.height), (960, 540));

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (960, 540));
        let original = image::open(&input).unwrap();
        assert_eq!((original.width(), original.height()), (400, 200));
    }
}
