use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{crop, Image};
use crate::pose::{BodyPart, Human};

/// ズーム推定の参照範囲 [左端, 右端] を返す（両端含む）
pub fn get_zoom_lr(pos: usize, length: usize, zoom_range: usize) -> Result<(usize, usize)> {
    if length == 0 {
        return Err(Error::InvalidArgument("length == 0".into()));
    }
    if pos >= length {
        return Err(Error::InvalidArgument(format!(
            "pos {} out of range (length {})",
            pos, length
        )));
    }

    let left = pos.saturating_sub(zoom_range);
    let right = (pos + zoom_range).min(length - 1);
    Ok((left, right))
}

/// クロップ画像内の正規化座標を元画像の正規化座標へ変換する
fn coord_translate(
    x: f32,
    y: f32,
    original_height: usize,
    original_width: usize,
    crop_x: usize,
    crop_y: usize,
    crop_height: usize,
    crop_width: usize,
) -> Result<(f32, f32)> {
    if crop_height == 0 || crop_width == 0 {
        return Err(Error::InvalidArgument(
            "coord_translate: empty crop".into(),
        ));
    }
    if original_height == 0 || original_width == 0 {
        return Err(Error::InvalidArgument(
            "coord_translate: empty image".into(),
        ));
    }

    let mut x2 = (crop_height as f32 * x) as usize;
    let mut y2 = (crop_width as f32 * y) as usize;

    x2 = x2.min(crop_height - 1);
    y2 = y2.min(crop_width - 1);

    x2 += crop_x;
    y2 += crop_y;

    x2 = x2.min(original_height - 1);
    y2 = y2.min(original_width - 1);

    Ok((
        x2 as f32 / original_height as f32,
        y2 as f32 / original_width as f32,
    ))
}

/// 既知の推定結果を手がかりに、人物周辺をクロップして再推定する
///
/// `human` は対象フレームの推定結果（パーツ 1 つ以上）。`hints` は
/// 近傍フレームの同一人物で、バウンディングボックスの最低サイズを与える。
/// `estimator` はクロップ画像から同一人物を推定するコールバック。
/// 幾何的に縮退したケースではすべて元の `human` をそのまま返す
pub fn zoom_estimate<F>(
    image: &Image,
    human: &Human,
    hints: &[&Human],
    estimator: F,
) -> Result<Human>
where
    F: FnOnce(&Image) -> Result<Option<Human>>,
{
    let (height, width, _) = image.dim();

    if height == 0 || width == 0 {
        return Ok(human.clone());
    }
    if human.is_empty() {
        return Ok(human.clone());
    }

    let (mut x1, mut x2, mut y1, mut y2) = match human.bounding_box() {
        Some(bbox) => bbox,
        None => return Ok(human.clone()),
    };

    let count = human.len() as f32;
    let mut mid_x = 0.0f32;
    let mut mid_y = 0.0f32;
    for part in human.body_parts().values() {
        mid_x += part.x / count;
        mid_y += part.y / count;
    }

    // ヒントのバウンディングボックスから最低限確保したい高さ・幅を決める
    let mut hint_height = 0.0f32;
    let mut hint_width = 0.0f32;
    for hint in hints {
        if let Some((hx1, hx2, hy1, hy2)) = hint.bounding_box() {
            hint_height = hint_height.max(hx2 - hx1);
            hint_width = hint_width.max(hy2 - hy1);
        }
    }

    // 対象の箱を、重心を基準にヒントサイズ以上へ広げる
    let bound_x1 = x1.min(x2 - hint_height).min(mid_x - hint_height / 2.0);
    let bound_x2 = x2.max(x1 + hint_height).max(mid_x + hint_height / 2.0);
    let bound_y1 = y1.min(y2 - hint_width).min(mid_y - hint_width / 2.0);
    let bound_y2 = y2.max(y1 + hint_width).max(mid_y + hint_width / 2.0);
    (x1, x2, y1, y2) = (bound_x1, bound_x2, bound_y1, bound_y2);

    // さらに両軸とも各側 20% 広げる
    let x_expand = (x2 - x1) * 0.2;
    let y_expand = (y2 - y1) * 0.2;
    x1 -= x_expand;
    x2 += x_expand;
    y1 -= y_expand;
    y2 += y_expand;

    x1 = x1.max(0.0);
    x2 = x2.min(1.0);
    y1 = y1.max(0.0);
    y2 = y2.min(1.0);

    let mut x1_i = (x1 * height as f32) as usize;
    let mut x2_i = (x2 * height as f32) as usize;
    let mut y1_i = (y1 * width as f32) as usize;
    let mut y2_i = (y2 * width as f32) as usize;

    x1_i = x1_i.min(height - 1);
    x2_i = x2_i.min(height - 1).max(x1_i);
    y1_i = y1_i.min(width - 1);
    y2_i = y2_i.min(width - 1).max(y1_i);

    // 1 ピクセルに潰れた軸は画像寸法の 1/3 ずつ広げて救済する
    if x1_i == x2_i {
        let change = height / 3;
        x1_i = x1_i.saturating_sub(change);
        x2_i += change;
    }
    if y1_i == y2_i {
        let change = width / 3;
        y1_i = y1_i.saturating_sub(change);
        y2_i += change;
    }

    x1_i = x1_i.min(height - 1);
    x2_i = x2_i.min(height - 1).max(x1_i);
    y1_i = y1_i.min(width - 1);
    y2_i = y2_i.min(width - 1).max(y1_i);

    if x1_i == x2_i || y1_i == y2_i {
        debug!(x1_i, y1_i, "zoom window degenerate, keeping original estimation");
        return Ok(human.clone());
    }

    // 終端を排他側へ
    x2_i += 1;
    y2_i += 1;

    let cropped = crop(image, x1_i, y1_i, x2_i - x1_i, y2_i - y1_i);
    let (crop_height, crop_width, _) = cropped.dim();
    if crop_height == 0 || crop_width == 0 {
        return Ok(human.clone());
    }

    let cropped_human = match estimator(&cropped)? {
        Some(cropped_human) => cropped_human,
        None => return Ok(human.clone()),
    };

    // クロップ結果で改善したパーツだけ取り込む
    let mut new_human = human.clone();
    for part in cropped_human.body_parts().values() {
        let replace = match new_human.get(part.part_index) {
            None => true,
            Some(existing) => existing.score <= part.score,
        };
        if replace {
            let (x, y) = coord_translate(
                part.x, part.y, height, width, x1_i, y1_i, crop_height, crop_width,
            )?;
            new_human.insert(BodyPart::new(part.part_index, x, y, part.score));
        }
    }

    Ok(new_human)
}
