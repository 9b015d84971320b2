use std::sync::Arc;

use crate::image::Image;
use crate::pose::keypoint::Human;

/// 静止画 1 枚から人物姿勢を推定する能力の抽象
///
/// ONNX 等のバックエンドはこのトレイトを実装して差し込む。ハンドルは
/// スレッドセーフを要求されない代わりに、同時に 1 スレッドからのみ
/// 呼び出される（`&mut self`）。モデル入力サイズへのリサイズは実装側の責務。
pub trait StillEstimator {
    /// 画像 (H×W×C) から検出した人物のリストを返す。
    /// モーション推定コアは先頭の人物のみを使用する
    fn estimate(&mut self, image: &Image) -> anyhow::Result<Vec<Human>>;
}

/// フレーム画像を取得するコールバック
///
/// `last_access = true` は、この呼び出し以降コアがそのフレームの画像を
/// 読まないことを保証する。呼び出し側はこれを合図にデコード資源を
/// 解放してよい。複数ワーカーから同時に（同じ pos でも）呼ばれ得るため
/// 再入可能であること。`None` を返すとエラーになる
pub type ImageCallback<'a> = dyn Fn(usize, bool) -> Option<Arc<Image>> + Sync + 'a;
