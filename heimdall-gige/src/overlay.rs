//! Surimpression texte sur la trame d'affichage (id caméra + FPS courant),
//! miroir du `cv::putText` de l'implémentation d'origine. S'applique
//! uniquement à la trame publiée dans `LatestFrames`; la trame persistée sur
//! disque reste non annotée (§4.F étape 6).
//!
//! Aucun fichier de police TrueType n'est disponible dans ce dépôt pour
//! `ab_glyph`/`imageproc`, donc les glyphes sont une petite table bitmap 3x5
//! intégrée — dans l'esprit des polices constantes que l'écosystème
//! `embedded-graphics` distribue sous forme de données plutôt que de fichiers
//! de police analysés à l'exécution.

use heimdall_camera::format::Canonical;
use image::{Luma, Rgb};

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const GLYPH_SPACING: u32 = 1;
const LINE_SPACING: u32 = 2;

/// Table bitmap 3x5 couvrant les caractères attendus dans "CAM <id>" et
/// "<fps> FPS" (lettres majuscules, chiffres, espace, point, deux-points,
/// tiret, tiret bas). Tout caractère hors de cet ensemble est rendu vierge.
fn glyph_rows(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'Q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'R' => [0b111, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b111, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        _ => [0b000, 0b000, 0b000, 0b000, 0b000],
    }
}

fn set_bright_pixel(canonical: &mut Canonical, x: u32, y: u32) {
    if x >= canonical.width() || y >= canonical.height() {
        return;
    }
    match canonical {
        Canonical::Mono(img) => img.put_pixel(x, y, Luma([255u8])),
        Canonical::Bgr(img) => img.put_pixel(x, y, Rgb([0u8, 255u8, 0u8])),
    }
}

fn draw_char(canonical: &mut Canonical, ch: char, origin_x: u32, origin_y: u32) {
    let rows = glyph_rows(ch);
    for (row_idx, row) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            let bit = (row >> (GLYPH_WIDTH - 1 - col)) & 1;
            if bit == 1 {
                set_bright_pixel(canonical, origin_x + col, origin_y + row_idx as u32);
            }
        }
    }
}

fn draw_line(canonical: &mut Canonical, text: &str, origin_x: u32, origin_y: u32) {
    let mut cursor_x = origin_x;
    for ch in text.chars() {
        draw_char(canonical, ch, cursor_x, origin_y);
        cursor_x += GLYPH_WIDTH + GLYPH_SPACING;
    }
}

/// Dessine "CAM <id>" puis "<fps> FPS" dans le coin supérieur gauche de la
/// trame d'affichage, en place.
pub fn draw_camera_overlay(canonical: &mut Canonical, camera_id: &str, fps: f64) {
    let margin = 4;
    draw_line(canonical, &format!("CAM {camera_id}"), margin, margin);
    draw_line(
        canonical,
        &format!("{fps:.1} FPS"),
        margin,
        margin + GLYPH_HEIGHT + LINE_SPACING,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use heimdall_camera::format::Canonical as C;
    use image::ImageBuffer;

    #[test]
    fn overlay_lights_up_pixels_without_panicking_on_small_frames() {
        let mut canonical = C::Mono(ImageBuffer::new(32, 16));
        draw_camera_overlay(&mut canonical, "CAM_A", 9.8);
        let C::Mono(img) = &canonical else { unreachable!() };
        assert!(img.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn overlay_off_frame_glyphs_are_clipped_not_panicking() {
        let mut canonical = C::Bgr(ImageBuffer::new(4, 4));
        draw_camera_overlay(&mut canonical, "BAS-0001", 123.4);
        let C::Bgr(img) = &canonical else { unreachable!() };
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 4);
    }

    #[test]
    fn unsupported_characters_render_as_blank_glyph() {
        assert_eq!(glyph_rows('!'), [0, 0, 0, 0, 0]);
    }
}
