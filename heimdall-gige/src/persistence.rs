//! Persistance CSV des délais de bande passante et de l'historique d'offset
//! PTP (§6). Format de fichier uniquement: aucune logique métier ici.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use log::warn;

use crate::bandwidth::BandwidthPlan;
use crate::error::GigEError;

fn ensure_parent_dir(path: &Path) -> Result<(), GigEError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| GigEError::PersistenceError(format!("creating {parent:?}: {err}")))?;
    }
    Ok(())
}

/// Écrit une ligne `CameraID,PacketDelayNs,TransmissionDelayNs` par caméra.
/// Appelé une fois par exécution de l'ordonnanceur, pas par poll.
pub fn write_bandwidth_csv(path: &Path, plan: &BandwidthPlan) -> Result<(), GigEError> {
    ensure_parent_dir(path)?;
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| GigEError::PersistenceError(format!("opening {path:?}: {err}")))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if is_new {
        writer
            .write_record(["CameraID", "PacketDelayNs", "TransmissionDelayNs"])
            .map_err(|err| GigEError::PersistenceError(err.to_string()))?;
    }
    for (camera_id, delays) in &plan.per_camera {
        writer
            .write_record([
                camera_id.clone(),
                delays.packet_delay_ns.to_string(),
                delays.transmission_delay_ns.to_string(),
            ])
            .map_err(|err| GigEError::PersistenceError(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| GigEError::PersistenceError(err.to_string()))
}

/// Journal d'offset PTP: une ligne par poll, colonnes `<cam_id>_offset_ns`
/// qui s'élargissent si une caméra apparaît pour la première fois.
///
/// Tenu ouvert pour toute la durée du contrôleur PTP plutôt que réouvert à
/// chaque poll, pour ne pas retaper l'en-tête à chaque ligne.
pub struct OffsetCsvWriter {
    writer: csv::Writer<File>,
    columns: Vec<String>,
    sample: u64,
}

impl OffsetCsvWriter {
    pub fn create(path: &Path) -> Result<Self, GigEError> {
        ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|err| GigEError::PersistenceError(format!("opening {path:?}: {err}")))?;
        Ok(Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            columns: Vec::new(),
            sample: 0,
        })
    }

    /// `offsets` doit être ordonné de manière stable (même ordre d'une
    /// scrutation à l'autre); une nouvelle caméra élargit l'en-tête.
    pub fn append_poll(&mut self, offsets: &[(String, i64)]) -> Result<(), GigEError> {
        let mut header_changed = false;
        for (camera_id, _) in offsets {
            let column = format!("{camera_id}_offset_ns");
            if !self.columns.contains(&column) {
                self.columns.push(column);
                header_changed = true;
            }
        }
        if header_changed || self.sample == 0 {
            let mut header = vec!["sample".to_string()];
            header.extend(self.columns.iter().cloned());
            self.writer
                .write_record(&header)
                .map_err(|err| GigEError::PersistenceError(err.to_string()))?;
        }

        let mut row = vec![self.sample.to_string()];
        for column in &self.columns {
            let camera_id = column.trim_end_matches("_offset_ns");
            let value = offsets
                .iter()
                .find(|(id, _)| id == camera_id)
                .map(|(_, offset)| offset.to_string())
                .unwrap_or_default();
            row.push(value);
        }
        self.writer
            .write_record(&row)
            .map_err(|err| GigEError::PersistenceError(err.to_string()))?;
        self.writer
            .flush()
            .map_err(|err| GigEError::PersistenceError(err.to_string()))?;
        self.sample += 1;
        Ok(())
    }
}

/// Persiste une trame canonique au format PNG; un échec est journalisé et
/// compté, sans jamais interrompre la boucle de capture (§7).
pub fn save_frame_png(path: &Path, width: u32, height: u32, channels: u32, pixels: &[u8]) -> Result<(), GigEError> {
    ensure_parent_dir(path)?;
    let result = match channels {
        1 => image::GrayImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| GigEError::PersistenceError("frame buffer size mismatch".to_string()))
            .and_then(|img| {
                img.save(path)
                    .map_err(|err| GigEError::PersistenceError(err.to_string()))
            }),
        3 => image::RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| GigEError::PersistenceError("frame buffer size mismatch".to_string()))
            .and_then(|img| {
                img.save(path)
                    .map_err(|err| GigEError::PersistenceError(err.to_string()))
            }),
        other => Err(GigEError::PersistenceError(format!(
            "unsupported channel count for PNG persistence: {other}"
        ))),
    };
    if let Err(ref err) = result {
        warn!("failed to persist frame to {path:?}: {err}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::CameraDelays;
    use tempfile::tempdir;

    #[test]
    fn bandwidth_csv_writes_header_once_and_one_row_per_camera() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bandwidth").join("bandwidth_delays_test.csv");
        let plan = BandwidthPlan {
            per_camera: vec![
                (
                    "CAM_A".to_string(),
                    CameraDelays {
                        camera_index: 0,
                        packet_delay_ns: 75_704,
                        transmission_delay_ns: 75_704,
                    },
                ),
                (
                    "CAM_B".to_string(),
                    CameraDelays {
                        camera_index: 1,
                        packet_delay_ns: 75_704,
                        transmission_delay_ns: 0,
                    },
                ),
            ],
            fps_ceiling: 42.0,
        };
        write_bandwidth_csv(&path, &plan).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "CameraID,PacketDelayNs,TransmissionDelayNs");
        assert_eq!(lines.next().unwrap(), "CAM_A,75704,75704");
        assert_eq!(lines.next().unwrap(), "CAM_B,75704,0");
    }

    #[test]
    fn offset_csv_widens_header_as_new_cameras_appear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offset").join("ptp_offset_history_test.csv");
        let mut writer = OffsetCsvWriter::create(&path).unwrap();
        writer.append_poll(&[("CAM_A".to_string(), 100)]).unwrap();
        writer
            .append_poll(&[("CAM_A".to_string(), 50), ("CAM_B".to_string(), -20)])
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[0].contains("CAM_A_offset_ns"));
        assert!(lines.iter().any(|line| line.contains("CAM_B_offset_ns")));
    }
}
