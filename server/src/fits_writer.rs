// Minimal single-HDU FITS writer: 16-bit unsigned, 2-D image data.
// No FITS-writing crate appears in the reference corpus, so this
// implements only what the camera needs: an 80-column-card ASCII
// header padded to a 2880-byte block, followed by big-endian u16
// pixel data (FITS mandates big-endian, offset-binary BZERO=32768/
// BSCALE=1 encoding for unsigned 16-bit data) padded to a 2880-byte
// block. No compression, no multi-extension support, no WCS.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use mookodi_elements::error::filesystem_error;
use mookodi_elements::fits_header::FitsHeader;
use canonical_error::CanonicalError;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

pub fn write_image(
    path: &Path, header: &FitsHeader, ncols: u32, nrows: u32, pixels: &[u16],
) -> Result<(), CanonicalError> {
    if pixels.len() != (ncols as usize) * (nrows as usize) {
        return Err(filesystem_error(&format!(
            "pixel buffer length {} does not match {}x{}", pixels.len(), ncols, nrows)));
    }

    let mut file = File::create(path)
        .map_err(|e| filesystem_error(&format!("creating {}: {}", path.display(), e)))?;

    let mut cards = mandatory_cards(ncols, nrows);
    cards.extend(header.render_cards());
    write_card_block(&mut file, &cards)
        .map_err(|e| filesystem_error(&format!("writing header of {}: {}", path.display(), e)))?;

    write_pixel_block(&mut file, pixels)
        .map_err(|e| filesystem_error(&format!("writing pixels of {}: {}", path.display(), e)))?;

    Ok(())
}

fn mandatory_cards(ncols: u32, nrows: u32) -> Vec<String> {
    vec![
        fixed_card("SIMPLE", "T", "file conforms to FITS standard"),
        fixed_card("BITPIX", "16", "16-bit unsigned integers"),
        fixed_card("NAXIS", "2", "2-dimensional image"),
        fixed_card("NAXIS1", &ncols.to_string(), "number of columns"),
        fixed_card("NAXIS2", &nrows.to_string(), "number of rows"),
        fixed_card("BZERO", "32768", "offset for unsigned 16-bit data"),
        fixed_card("BSCALE", "1", "no scaling"),
    ]
}

fn fixed_card(keyword: &str, value: &str, comment: &str) -> String {
    let mut line = format!("{:<8}= {:>20} / {}", keyword, value, comment);
    if line.len() > CARD_SIZE {
        line.truncate(CARD_SIZE);
    } else {
        line = format!("{:<width$}", line, width = CARD_SIZE);
    }
    line
}

fn write_card_block(file: &mut File, cards: &[String]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(cards.len() * CARD_SIZE + BLOCK_SIZE);
    for card in cards {
        bytes.extend_from_slice(card.as_bytes());
    }
    bytes.extend_from_slice(&format!("{:<80}", "END").into_bytes());
    pad_to_block(&mut bytes, b' ');
    file.write_all(&bytes)
}

fn write_pixel_block(file: &mut File, pixels: &[u16]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(pixels.len() * 2 + BLOCK_SIZE);
    for &pixel in pixels {
        // Offset-binary: physical value = stored - 32768, so an
        // unsigned pixel is stored as (pixel as i32 - 32768) as i16.
        let stored = (pixel as i32 - 32768) as i16;
        bytes.extend_from_slice(&stored.to_be_bytes());
    }
    pad_to_block(&mut bytes, 0);
    file.write_all(&bytes)
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let remainder = bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        bytes.resize(bytes.len() + (BLOCK_SIZE - remainder), fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_file_is_block_aligned() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let header = FitsHeader::new();
        let pixels = vec![32768u16; 4 * 4];
        write_image(tmp.path(), &header, 4, 4, &pixels).unwrap();
        let len = std::fs::metadata(tmp.path()).unwrap().len();
        assert_eq!(len % BLOCK_SIZE as u64, 0);
    }

    #[test]
    fn rejects_mismatched_pixel_count() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let header = FitsHeader::new();
        let pixels = vec![0u16; 3];
        assert!(write_image(tmp.path(), &header, 4, 4, &pixels).is_err());
    }

    #[test]
    fn offset_binary_round_trips_zero() {
        // A physical value of 0 stores as i16::MIN.
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let header = FitsHeader::new();
        write_image(tmp.path(), &header, 1, 1, &[0u16]).unwrap();
        let contents = std::fs::read(tmp.path()).unwrap();
        let pixel_offset = contents.len() - BLOCK_SIZE;
        let stored = i16::from_be_bytes([contents[pixel_offset], contents[pixel_offset + 1]]);
        assert_eq!(stored, i16::MIN);
    }
}
