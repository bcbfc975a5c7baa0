use image::Rgb;

pub const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
pub const FPS_TEXT: Rgb<u8> = Rgb([0, 255, 0]);

/// Deterministic box colour for a class id.
///
/// Channels are capped so white label text stays readable on top.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    const GOLDEN: u32 = 2_654_435_761;
    let mut hash = (class_id as u32).wrapping_add(1).wrapping_mul(GOLDEN);
    let mut channels = [0u16; 3];
    for channel in channels.iter_mut() {
        *channel = (hash >> 24) as u16;
        hash = hash.wrapping_mul(GOLDEN);
    }

    let brightest = channels.iter().copied().max().unwrap_or(0);
    let [r, g, b] = channels.map(|c| {
        let floor = if c == brightest { 100 } else { 40 };
        c.clamp(floor, 200) as u8
    });
    Rgb([r, g, b])
}
