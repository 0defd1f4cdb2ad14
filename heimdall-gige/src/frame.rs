//! Trame canonique publiée par le moteur d'acquisition et vecteur partagé
//! de "dernière trame par caméra".
//!
//! Une seule trame "la plus récente" existe par caméra: les tâches de
//! capture l'écrasent, les lecteurs en prennent un instantané sous mutex.
//! L'alignement temporel entre caméras est obtenu par PTP + cadence
//! identique, pas par un ordonnancement logiciel des trames (§5).

use std::sync::Mutex;

use heimdall_camera::PixelFormat;

/// Image canonique décodée et horodatée, prête à être publiée dans le slot
/// d'une caméra ou persistée sur disque.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format_tag: PixelFormat,
    pub device_timestamp_ns: u64,
    pub camera_id: String,
}

/// Vecteur `latestFrames[0..N-1]`: une entrée par caméra ouverte, gardée
/// derrière un unique mutex couvrant tout le vecteur (§5, §9 — forme
/// simple retenue plutôt qu'un slot SPSC par caméra).
#[derive(Debug, Default)]
pub struct LatestFrames {
    slots: Mutex<Vec<Option<Frame>>>,
}

impl LatestFrames {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; slot_count]),
        }
    }

    /// Écrit la trame la plus récente dans le slot `index`, en écrasant la précédente.
    pub fn publish(&self, index: usize, frame: Frame) {
        let mut slots = self.slots.lock().unwrap();
        if index < slots.len() {
            slots[index] = Some(frame);
        }
    }

    /// Instantané cohérent du vecteur complet au moment de l'acquisition du
    /// mutex; ne garantit pas une coïncidence temporelle inter-caméras.
    pub fn snapshot(&self) -> Vec<Option<Frame>> {
        self.slots.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(camera_id: &str, ts: u64) -> Frame {
        Frame {
            pixels: vec![0u8; 4],
            width: 2,
            height: 2,
            pixel_format_tag: PixelFormat::Mono8,
            device_timestamp_ns: ts,
            camera_id: camera_id.to_string(),
        }
    }

    #[test]
    fn publish_overwrites_previous_frame_in_same_slot() {
        let latest = LatestFrames::new(2);
        latest.publish(0, frame("CAM_A", 1));
        latest.publish(0, frame("CAM_A", 2));
        let snapshot = latest.snapshot();
        assert_eq!(snapshot[0].as_ref().unwrap().device_timestamp_ns, 2);
        assert!(snapshot[1].is_none());
    }

    #[test]
    fn snapshot_reflects_every_published_slot_independently() {
        let latest = LatestFrames::new(3);
        latest.publish(0, frame("CAM_A", 10));
        latest.publish(2, frame("CAM_C", 20));
        let snapshot = latest.snapshot();
        assert!(snapshot[0].is_some());
        assert!(snapshot[1].is_none());
        assert!(snapshot[2].is_some());
    }

    #[test]
    fn out_of_range_index_is_ignored_rather_than_panicking() {
        let latest = LatestFrames::new(1);
        latest.publish(5, frame("CAM_X", 1));
        assert!(latest.snapshot()[0].is_none());
    }
}
