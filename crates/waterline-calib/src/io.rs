//! Calibration persistence.
//!
//! The on-disk document keeps labelled pixel/world correspondences, the
//! search regions, and the generated search lines. Homographies are never
//! stored: loading refits them from the loaded points, so a manually edited
//! file always yields a self-consistent model.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::Rect;
use waterline_target::TargetKind;

use crate::control::CalibrationControl;
use crate::error::CalibrationError;
use crate::model::CalibrationModel;

/// One pixel/world correspondence.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PointPairDto {
    #[serde(rename = "pixelX")]
    pub pixel_x: f64,
    #[serde(rename = "pixelY")]
    pub pixel_y: f64,
    #[serde(rename = "worldX")]
    pub world_x: f64,
    #[serde(rename = "worldY")]
    pub world_y: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelToWorldDto {
    pub points: Vec<PointPairDto>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegionDto {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WaterlineRegionDto {
    pub toplft_x: f64,
    pub toplft_y: f64,
    pub toprgt_x: f64,
    pub toprgt_y: f64,
    pub botlft_x: f64,
    pub botlft_y: f64,
    pub botrgt_x: f64,
    pub botrgt_y: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SearchLineDto {
    #[serde(rename = "topX")]
    pub top_x: f64,
    #[serde(rename = "topY")]
    pub top_y: f64,
    #[serde(rename = "botX")]
    pub bot_x: f64,
    #[serde(rename = "botY")]
    pub bot_y: f64,
}

/// The complete calibration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationFile {
    #[serde(rename = "calibType")]
    pub calib_type: String,
    #[serde(rename = "imageWidth")]
    pub image_width: u32,
    #[serde(rename = "imageHeight")]
    pub image_height: u32,
    #[serde(rename = "facetLength")]
    pub facet_length: f64,
    #[serde(rename = "zeroOffset")]
    pub zero_offset: f64,
    #[serde(rename = "PixelToWorld")]
    pub pixel_to_world: PixelToWorldDto,
    #[serde(rename = "TargetSearchRegion")]
    pub target_search_region: RegionDto,
    #[serde(rename = "WaterlineSearchRegion")]
    pub waterline_search_region: WaterlineRegionDto,
    #[serde(rename = "SearchLines")]
    pub search_lines: Vec<SearchLineDto>,
    /// Escaped JSON string holding the re-calibration control document.
    pub control_json: String,
}

fn kind_name(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Octagon => "Octagon",
        TargetKind::BowTie => "BowTie",
        TargetKind::StopSign => "StopSign",
    }
}

fn kind_from_name(name: &str) -> Result<TargetKind, CalibrationError> {
    match name {
        "Octagon" => Ok(TargetKind::Octagon),
        "BowTie" => Ok(TargetKind::BowTie),
        "StopSign" => Ok(TargetKind::StopSign),
        other => Err(CalibrationError::Persistence(format!(
            "unknown calibType {other:?}"
        ))),
    }
}

/// Build the persistence document from a calibrated model.
pub fn to_file(model: &CalibrationModel) -> Result<CalibrationFile, CalibrationError> {
    let control = model.control().ok_or(CalibrationError::NotCalibrated)?;
    let (width, height) = model.image_size().ok_or(CalibrationError::NotCalibrated)?;
    let corners = model
        .waterline_corners()
        .ok_or(CalibrationError::NotCalibrated)?;

    let points = model
        .pixel_points()
        .iter()
        .zip(model.world_points())
        .map(|(p, w)| PointPairDto {
            pixel_x: p.x,
            pixel_y: p.y,
            world_x: w.x,
            world_y: w.y,
        })
        .collect();

    let r = control.target_search_region;
    let control_json = serde_json::to_string(control)
        .map_err(|e| CalibrationError::Persistence(e.to_string()))?;

    Ok(CalibrationFile {
        calib_type: kind_name(control.target.kind).to_string(),
        image_width: width as u32,
        image_height: height as u32,
        facet_length: control.facet_length,
        zero_offset: control.zero_offset,
        pixel_to_world: PixelToWorldDto { points },
        target_search_region: RegionDto {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        },
        waterline_search_region: WaterlineRegionDto {
            toplft_x: corners.top_left.x,
            toplft_y: corners.top_left.y,
            toprgt_x: corners.top_right.x,
            toprgt_y: corners.top_right.y,
            botlft_x: corners.bottom_left.x,
            botlft_y: corners.bottom_left.y,
            botrgt_x: corners.bottom_right.x,
            botrgt_y: corners.bottom_right.y,
        },
        search_lines: model
            .search_lines()
            .iter()
            .map(|s| SearchLineDto {
                top_x: s.top.x,
                top_y: s.top.y,
                bot_x: s.bottom.x,
                bot_y: s.bottom.y,
            })
            .collect(),
        control_json,
    })
}

/// Rebuild a model from a persistence document.
///
/// Point counts are validated against the target layout (`columns * rows`
/// for bow-tie grids, at least 5 otherwise); homographies and search lines
/// are recomputed from the loaded points rather than trusted from the file.
pub fn from_file(file: &CalibrationFile) -> Result<CalibrationModel, CalibrationError> {
    let kind = kind_from_name(&file.calib_type)?;

    let mut control: CalibrationControl = serde_json::from_str(&file.control_json)
        .map_err(|e| CalibrationError::Persistence(format!("control_json: {e}")))?;
    if control.target.kind != kind {
        return Err(CalibrationError::Persistence(format!(
            "calibType {:?} disagrees with control_json target {:?}",
            file.calib_type, control.target.kind
        )));
    }
    control.facet_length = file.facet_length;
    control.zero_offset = file.zero_offset;
    control.target_search_region = Rect::new(
        file.target_search_region.x,
        file.target_search_region.y,
        file.target_search_region.width,
        file.target_search_region.height,
    );

    let n = file.pixel_to_world.points.len();
    let need = control.target.min_point_count();
    if n < need.max(5) {
        return Err(CalibrationError::Persistence(format!(
            "point count {n} below minimum {} for {:?}",
            need.max(5),
            kind
        )));
    }
    if kind == TargetKind::BowTie && n != need {
        return Err(CalibrationError::Persistence(format!(
            "bow-tie grid expects {need} points ({} x {}), found {n}",
            control.target.columns, control.target.rows
        )));
    }

    let w = &file.waterline_search_region;
    control.waterline_corners = Some([
        Point2::new(w.toplft_x, w.toplft_y),
        Point2::new(w.toprgt_x, w.toprgt_y),
        Point2::new(w.botlft_x, w.botlft_y),
        Point2::new(w.botrgt_x, w.botrgt_y),
    ]);

    let pixel_points = file
        .pixel_to_world
        .points
        .iter()
        .map(|p| Point2::new(p.pixel_x, p.pixel_y))
        .collect();
    let world_points = file
        .pixel_to_world
        .points
        .iter()
        .map(|p| Point2::new(p.world_x, p.world_y))
        .collect();

    let mut model = CalibrationModel::new();
    model.calibrate_from_points(
        (file.image_width as usize, file.image_height as usize),
        pixel_points,
        world_points,
        &control,
    )?;
    Ok(model)
}

/// Write a model to a JSON file.
pub fn write_model(path: &Path, model: &CalibrationModel) -> Result<(), CalibrationError> {
    let doc = to_file(model)?;
    let file =
        File::create(path).map_err(|e| CalibrationError::Persistence(e.to_string()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &doc)
        .map_err(|e| CalibrationError::Persistence(e.to_string()))?;
    info!("calibration written to {}", path.display());
    Ok(())
}

/// Read a model from a JSON file.
pub fn read_model(path: &Path) -> Result<CalibrationModel, CalibrationError> {
    let file = File::open(path).map_err(|e| CalibrationError::Persistence(e.to_string()))?;
    let doc: CalibrationFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| CalibrationError::Persistence(e.to_string()))?;
    from_file(&doc)
}
