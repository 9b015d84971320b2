use ndarray::{s, Array3};

use crate::error::{Error, Result};

/// フレーム画像。H×W×C の画素グリッド
pub type Image = Array3<f32>;

/// バイリニア補間によるリサイズ
///
/// 最終行・最終列では参照できる近傍画素だけで補間する。
/// 入力・出力いずれかの次元が 0 の場合はエラー
pub fn resize(image: &Image, target_height: usize, target_width: usize) -> Result<Image> {
    let (height, width, channels) = image.dim();
    if height == 0 || width == 0 || channels == 0 || target_height == 0 || target_width == 0 {
        return Err(Error::InvalidArgument(
            "resize: empty image or empty target".into(),
        ));
    }

    let mut target = Array3::zeros((target_height, target_width, channels));

    let x_ratio = height as f32 / target_height as f32;
    let y_ratio = width as f32 / target_width as f32;

    for i in 0..target_height {
        for j in 0..target_width {
            let x = height * i / target_height;
            let y = width * j / target_width;
            let x_diff = x_ratio * i as f32 - x as f32;
            let y_diff = y_ratio * j as f32 - y as f32;

            if x + 1 < height && y + 1 < width {
                for k in 0..channels {
                    target[[i, j, k]] = image[[x, y, k]] * (1.0 - x_diff) * (1.0 - y_diff)
                        + image[[x, y + 1, k]] * (1.0 - x_diff) * y_diff
                        + image[[x + 1, y, k]] * x_diff * (1.0 - y_diff)
                        + image[[x + 1, y + 1, k]] * x_diff * y_diff;
                }
            } else if x + 1 < height {
                for k in 0..channels {
                    target[[i, j, k]] =
                        image[[x, y, k]] * (1.0 - x_diff) + image[[x + 1, y, k]] * x_diff;
                }
            } else if y + 1 < width {
                for k in 0..channels {
                    target[[i, j, k]] =
                        image[[x, y, k]] * (1.0 - y_diff) + image[[x, y + 1, k]] * y_diff;
                }
            } else {
                for k in 0..channels {
                    target[[i, j, k]] = image[[x, y, k]];
                }
            }
        }
    }

    Ok(target)
}

/// 矩形クロップ。ウィンドウは画像内にクランプされる
///
/// 結果が空（いずれかの次元が 0）になることは許容される。呼び出し側で確認すること
pub fn crop(image: &Image, x: usize, y: usize, target_height: usize, target_width: usize) -> Image {
    let (height, width, _) = image.dim();

    let x1 = x.min(height);
    let y1 = y.min(width);
    let x2 = (x1 + target_height).min(height);
    let y2 = (y1 + target_width).min(width);

    image.slice(s![x1..x2, y1..y2, ..]).to_owned()
}
