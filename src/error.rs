use thiserror::Error;

/// クレート全体で使う Result エイリアス
pub type Result<T> = std::result::Result<T, Error>;

/// モーション推定パイプラインのエラー
#[derive(Error, Debug)]
pub enum Error {
    /// 引数が不正（length==0、pos>=length、空のプールなど）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// スケジューラ内部の不変条件違反（期待したキャッシュエントリの欠落など）
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// 外部の静止画推定器から伝播したエラー
    #[error(transparent)]
    Estimator(#[from] anyhow::Error),

    /// 画像コールバックが画像を返さなかった
    #[error("image callback returned no image for frame {0}")]
    Io(usize),

    /// シリアライズ・デシリアライズの要素数が上限 (2^29) を超えた
    #[error("too many items: {0}")]
    Overflow(usize),
}
