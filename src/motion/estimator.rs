use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::Image;
use crate::motion::anti_crossing::anti_crossing;
use crate::motion::fuzz::{fuzz, get_fuzz_lr};
use crate::motion::zoom::{get_zoom_lr, zoom_estimate};
use crate::pose::{Human, ImageCallback, PartIndex, StillEstimator};

/// 骨格接続の最大長制約。`from`→`to` の距離が `max_length` を超えたら
/// `to` を取り除く
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxLengthRule {
    pub from: PartIndex,
    pub to: PartIndex,
    pub max_length: f32,
}

/// モーション推定のパラメータ一式
#[derive(Debug, Clone)]
pub struct EstimateOptions {
    /// ファズ補間で参照する近傍範囲。0 で補間なし
    pub fuzz_range: usize,
    pub max_lengths: Vec<MaxLengthRule>,
    pub anti_crossing: bool,
    /// ズーム再推定を行うか
    pub zoom: bool,
    /// ズーム時のヒント参照範囲
    pub zoom_range: usize,
    /// zoom_rate フレームごとにズーム再推定する (>= 1)
    pub zoom_rate: usize,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            fuzz_range: 10,
            max_lengths: Vec::new(),
            anti_crossing: true,
            zoom: false,
            zoom_range: 1,
            zoom_rate: 1,
        }
    }
}

impl EstimateOptions {
    fn needs_zoom(&self, frame: usize) -> bool {
        self.zoom && frame % self.zoom_rate == 0
    }
}

type PoseCache = HashMap<usize, Option<Human>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Task {
    frame: usize,
    zoomed: bool,
}

fn estimate_still<S: StillEstimator>(still: &mut S, image: &Image) -> Result<Option<Human>> {
    let humans = still.estimate(image).map_err(Error::Estimator)?;
    Ok(humans.into_iter().next())
}

fn zoom_with<Z: StillEstimator>(
    zoom_still: &mut Z,
    image: &Image,
    base: &Human,
    hints: &[Human],
) -> Result<Human> {
    let hint_refs: Vec<&Human> = hints.iter().collect();
    zoom_estimate(image, base, &hint_refs, |cropped| {
        let humans = zoom_still.estimate(cropped).map_err(Error::Estimator)?;
        Ok(humans.into_iter().next())
    })
}

// ===========================================================================
// 並列スケジューラ
// ===========================================================================

struct SchedulerState {
    unzoomed: PoseCache,
    finals: PoseCache,
    required: VecDeque<Task>,
    extra: VecDeque<Task>,
    /// このラウンドで報告済みのワーカー数
    reported: usize,
    round: u64,
    terminate: bool,
    error: Option<Error>,
}

impl SchedulerState {
    /// フレームの姿勢が「適切なキャッシュ」に存在するか
    fn covered(&self, frame: usize, options: &EstimateOptions) -> bool {
        if self.finals.contains_key(&frame) {
            return true;
        }
        options.needs_zoom(frame) && self.unzoomed.contains_key(&frame)
    }

    /// ズームのヒントとして使う近傍フレームの姿勢。最終キャッシュ優先
    fn hint(&self, frame: usize, options: &EstimateOptions) -> Option<Human> {
        if let Some(entry) = self.finals.get(&frame) {
            return entry.clone();
        }
        if options.needs_zoom(frame) {
            if let Some(entry) = self.unzoomed.get(&frame) {
                return entry.clone();
            }
        }
        None
    }

    fn task_ready(&self, task: &Task, options: &EstimateOptions, length: usize) -> bool {
        if !task.zoomed {
            return true;
        }
        let left = task.frame.saturating_sub(options.zoom_range);
        let right = (task.frame + options.zoom_range).min(length - 1);
        (left..=right).all(|j| j == task.frame || self.covered(j, options))
            && self.unzoomed.contains_key(&task.frame)
    }

    /// 依存の揃った先頭タスクを取り出す。必須キューを先に見る
    fn claim(&mut self, options: &EstimateOptions, length: usize) -> Option<Task> {
        for queue_is_required in [true, false] {
            let position = {
                let queue = if queue_is_required {
                    &self.required
                } else {
                    &self.extra
                };
                queue
                    .iter()
                    .position(|task| self.task_ready(task, options, length))
            };
            if let Some(index) = position {
                let queue = if queue_is_required {
                    &mut self.required
                } else {
                    &mut self.extra
                };
                return queue.remove(index);
            }
        }
        None
    }

    /// ワーカー失敗時: 両キューを空にして全員を起こし、最初のエラーを保持する
    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.required.clear();
        self.extra.clear();
        self.terminate = true;
    }
}

struct Scheduler<'a> {
    state: Mutex<SchedulerState>,
    round_cv: Condvar,
    report_cv: Condvar,
    options: &'a EstimateOptions,
    length: usize,
    image_callback: &'a ImageCallback<'a>,
}

impl<'a> Scheduler<'a> {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'g>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'g, SchedulerState>,
    ) -> MutexGuard<'g, SchedulerState> {
        cv.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    fn fetch_image(&self, frame: usize, last_access: bool) -> Result<Arc<Image>> {
        (self.image_callback)(frame, last_access).ok_or(Error::Io(frame))
    }

    fn worker<S, Z>(&self, still: &mut S, zoom_still: &mut Z)
    where
        S: StillEstimator,
        Z: StillEstimator,
    {
        let mut guard = self.lock();
        loop {
            if guard.terminate {
                break;
            }
            let round = guard.round;

            if let Some(task) = guard.claim(self.options, self.length) {
                guard = self.run_task(guard, task, still, zoom_still);
                if guard.terminate {
                    // 自分または他のワーカーが失敗している。報告だけして抜ける
                    guard.reported += 1;
                    self.report_cv.notify_one();
                    break;
                }
            }

            guard.reported += 1;
            self.report_cv.notify_one();
            while guard.round == round && !guard.terminate {
                guard = self.wait(&self.round_cv, guard);
            }
        }
    }

    fn run_task<'g, S, Z>(
        &'g self,
        mut guard: MutexGuard<'g, SchedulerState>,
        task: Task,
        still: &mut S,
        zoom_still: &mut Z,
    ) -> MutexGuard<'g, SchedulerState>
    where
        S: StillEstimator,
        Z: StillEstimator,
    {
        if !task.zoomed {
            let frame = task.frame;
            let needs_zoom = self.options.needs_zoom(frame);
            drop(guard);

            // 推定器呼び出しと画像取得はロック外で行う
            let outcome = self
                .fetch_image(frame, !needs_zoom)
                .and_then(|image| estimate_still(still, &image));

            guard = self.lock();
            match outcome {
                Ok(human) => {
                    if needs_zoom {
                        guard.unzoomed.insert(frame, human);
                    } else {
                        guard.finals.insert(frame, human);
                    }
                }
                Err(error) => {
                    guard.fail(error);
                    self.round_cv.notify_all();
                    self.report_cv.notify_one();
                }
            }
            return guard;
        }

        let frame = task.frame;
        let base = match guard.unzoomed.get(&frame) {
            Some(entry) => entry.clone(),
            None => {
                guard.fail(Error::InvariantViolation(format!(
                    "unzoomed estimation missing for frame {}",
                    frame
                )));
                self.round_cv.notify_all();
                self.report_cv.notify_one();
                return guard;
            }
        };

        let Some(base_human) = base else {
            // 人物のいないフレームはズーム呼び出しなしで確定する
            guard.finals.insert(frame, None);
            return guard;
        };

        let left = frame.saturating_sub(self.options.zoom_range);
        let right = (frame + self.options.zoom_range).min(self.length - 1);
        let hints: Vec<Human> = (left..=right)
            .filter(|&j| j != frame)
            .filter_map(|j| guard.hint(j, self.options))
            .collect();
        drop(guard);

        let outcome = self
            .fetch_image(frame, true)
            .and_then(|image| zoom_with(zoom_still, &image, &base_human, &hints));

        guard = self.lock();
        match outcome {
            Ok(human) => {
                guard.finals.insert(frame, Some(human));
            }
            Err(error) => {
                guard.fail(error);
                self.round_cv.notify_all();
                self.report_cv.notify_one();
            }
        }
        guard
    }

    /// 全ワーカーの報告を待ち、必須キューが空になるまでラウンドを繰り返す
    fn coordinate(&self, worker_count: usize) {
        let mut guard = self.lock();
        loop {
            while guard.reported < worker_count && !guard.terminate {
                guard = self.wait(&self.report_cv, guard);
            }
            if guard.terminate {
                self.round_cv.notify_all();
                break;
            }
            if guard.required.is_empty() {
                guard.terminate = true;
                self.round_cv.notify_all();
                break;
            }
            guard.reported = 0;
            guard.round += 1;
            self.round_cv.notify_all();
        }
    }
}

// ===========================================================================
// フレーム解決（シングルスレッド経路と最終組み立ての共通部）
// ===========================================================================

struct FrameResolver<'a, S, Z> {
    unzoomed: &'a mut PoseCache,
    finals: &'a mut PoseCache,
    still: &'a mut S,
    zoom_still: &'a mut Z,
    image_callback: &'a ImageCallback<'a>,
    options: &'a EstimateOptions,
    length: usize,
    /// アンチクロス + 最大長適用後のフレーム別メモ（この呼び出し限り）
    processed: HashMap<usize, Option<Human>>,
}

impl<'a, S, Z> FrameResolver<'a, S, Z>
where
    S: StillEstimator,
    Z: StillEstimator,
{
    fn fetch_image(&self, frame: usize, last_access: bool) -> Result<Arc<Image>> {
        (self.image_callback)(frame, last_access).ok_or(Error::Io(frame))
    }

    /// 未ズーム推定を適切なキャッシュへ確保する
    fn ensure_unzoomed(&mut self, frame: usize) -> Result<()> {
        if self.finals.contains_key(&frame) {
            return Ok(());
        }
        if self.options.needs_zoom(frame) {
            if self.unzoomed.contains_key(&frame) {
                return Ok(());
            }
            // このフレームはあとでズーム読みが残る
            let image = self.fetch_image(frame, false)?;
            let human = estimate_still(&mut *self.still, &image)?;
            self.unzoomed.insert(frame, human);
        } else {
            let image = self.fetch_image(frame, true)?;
            let human = estimate_still(&mut *self.still, &image)?;
            self.finals.insert(frame, human);
        }
        Ok(())
    }

    fn hint(&self, frame: usize) -> Option<Human> {
        if let Some(entry) = self.finals.get(&frame) {
            return entry.clone();
        }
        if self.options.needs_zoom(frame) {
            if let Some(entry) = self.unzoomed.get(&frame) {
                return entry.clone();
            }
        }
        None
    }

    /// キャッシュ済みの最終姿勢を返すか、未ズーム→ズームの推定連鎖を実行する
    fn raw(&mut self, frame: usize) -> Result<Option<Human>> {
        if let Some(entry) = self.finals.get(&frame) {
            return Ok(entry.clone());
        }

        if !self.options.needs_zoom(frame) {
            let image = self.fetch_image(frame, true)?;
            let human = estimate_still(&mut *self.still, &image)?;
            self.finals.insert(frame, human.clone());
            return Ok(human);
        }

        let (left, right) = get_zoom_lr(frame, self.length, self.options.zoom_range)?;
        for j in left..=right {
            self.ensure_unzoomed(j)?;
        }

        let base = self.unzoomed.get(&frame).cloned().ok_or_else(|| {
            Error::InvariantViolation(format!("unzoomed estimation missing for frame {}", frame))
        })?;

        let result = match base {
            Some(base_human) => {
                let hints: Vec<Human> = (left..=right)
                    .filter(|&j| j != frame)
                    .filter_map(|j| self.hint(j))
                    .collect();
                let image = self.fetch_image(frame, true)?;
                Some(zoom_with(
                    &mut *self.zoom_still,
                    &image,
                    &base_human,
                    &hints,
                )?)
            }
            None => None,
        };
        self.finals.insert(frame, result.clone());
        Ok(result)
    }

    /// raw にアンチクロスと最大長制約を適用した結果。フレーム別にメモ化する
    fn processed(&mut self, frame: usize) -> Result<Option<Human>> {
        if let Some(entry) = self.processed.get(&frame) {
            return Ok(entry.clone());
        }

        let result = match self.raw(frame)? {
            Some(human) => {
                let mut human = if self.options.anti_crossing {
                    let left = if frame > 0 { self.raw(frame - 1)? } else { None };
                    let right = if frame + 1 < self.length {
                        self.raw(frame + 1)?
                    } else {
                        None
                    };
                    anti_crossing(&human, left.as_ref(), right.as_ref())
                } else {
                    human
                };

                for rule in &self.options.max_lengths {
                    if let (Some(from), Some(to)) = (human.get(rule.from), human.get(rule.to)) {
                        let dx = to.x - from.x;
                        let dy = to.y - from.y;
                        if (dx * dx + dy * dy).sqrt() > rule.max_length {
                            human.remove(rule.to);
                        }
                    }
                }
                Some(human)
            }
            None => None,
        };

        self.processed.insert(frame, result.clone());
        Ok(result)
    }
}

// ===========================================================================
// 公開エントリポイント
// ===========================================================================

/// 単一人物のモーション推定器
///
/// フレームごとの静止画推定をキャッシュしつつ、ズーム再推定・
/// アンチクロス・ファズ補間を連鎖させて時間的に整合した姿勢を返す。
/// キャッシュは `estimate` 呼び出しをまたいで保持される。
/// 1 つのインスタンスを複数スレッドから同時に呼んではならない
/// （並列化は 1 回の `estimate` の内部で行われる）
#[derive(Default)]
pub struct Estimator {
    /// ズーム対象フレームの未ズーム推定
    unzoomed_still_poses: PoseCache,
    /// フレームごとの最終姿勢
    still_poses: PoseCache,
}

impl Estimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 両キャッシュを破棄する。別のフレーム列に切り替えるときに呼ぶ
    pub fn reset(&mut self) {
        self.unzoomed_still_poses.clear();
        self.still_poses.clear();
    }

    /// フレーム `pos` の姿勢を推定する
    ///
    /// `still_estimators` と `zoom_still_estimators` は同数のハンドルを
    /// 持つこと。2 個以上あればプール全体でワーカースレッドを回す。
    /// 戻り値は人物インデックス→姿勢のマップ（現状は一人なので
    /// 見つかれば `{0: human}`、いなければ空）
    pub fn estimate<S, Z>(
        &mut self,
        pos: usize,
        length: usize,
        options: &EstimateOptions,
        still_estimators: &mut [S],
        zoom_still_estimators: &mut [Z],
        image_callback: &ImageCallback<'_>,
    ) -> Result<BTreeMap<u32, Human>>
    where
        S: StillEstimator + Send,
        Z: StillEstimator + Send,
    {
        if length == 0 {
            return Err(Error::InvalidArgument("length == 0".into()));
        }
        if pos >= length {
            return Err(Error::InvalidArgument(format!(
                "pos {} out of range (length {})",
                pos, length
            )));
        }
        if options.zoom_rate == 0 {
            return Err(Error::InvalidArgument("zoom_rate == 0".into()));
        }
        if still_estimators.is_empty() {
            return Err(Error::InvalidArgument("empty estimator pool".into()));
        }
        if still_estimators.len() != zoom_still_estimators.len() {
            return Err(Error::InvalidArgument(format!(
                "pool size mismatch: {} still vs {} zoom",
                still_estimators.len(),
                zoom_still_estimators.len()
            )));
        }

        if still_estimators.len() > 1 {
            self.run_parallel(
                pos,
                length,
                options,
                still_estimators,
                zoom_still_estimators,
                image_callback,
            )?;
        }

        let mut resolver = FrameResolver {
            unzoomed: &mut self.unzoomed_still_poses,
            finals: &mut self.still_poses,
            still: &mut still_estimators[0],
            zoom_still: &mut zoom_still_estimators[0],
            image_callback,
            options,
            length,
            processed: HashMap::new(),
        };

        let human = fuzz(options.fuzz_range, &mut |offset, left| {
            let frame = if left {
                match pos.checked_sub(offset) {
                    Some(frame) => frame,
                    None => return Ok((false, None)),
                }
            } else {
                let frame = pos + offset;
                if frame >= length {
                    return Ok((false, None));
                }
                frame
            };
            Ok((true, resolver.processed(frame)?))
        })?;

        let mut result = BTreeMap::new();
        if let Some(human) = human {
            result.insert(0, human);
        }
        Ok(result)
    }

    /// 必須・追加の両キューを構築する
    ///
    /// 必須キューはファズ参照範囲（アンチクロス有効時は左右 1 フレーム
    /// ずつ拡張）を覆う。追加キューは範囲の外側へ一歩ずつ放射状に広げ、
    /// 手の空いたワーカーを先回りの推定に使う
    fn build_queues(
        &self,
        pos: usize,
        length: usize,
        options: &EstimateOptions,
    ) -> Result<(VecDeque<Task>, VecDeque<Task>)> {
        let (mut left, mut right) = get_fuzz_lr(pos, length, options.fuzz_range)?;
        if options.anti_crossing {
            left = left.saturating_sub(1);
            right = (right + 1).min(length - 1);
        }

        let mut required = VecDeque::new();
        let mut extra = VecDeque::new();
        let mut queued = HashSet::new();

        for frame in left..=right {
            self.schedule_frame(frame, length, options, &mut required, &mut queued)?;
        }

        let mut distance = 1usize;
        loop {
            let below = left.checked_sub(distance);
            let above = right + distance;
            if below.is_none() && above >= length {
                break;
            }
            if let Some(frame) = below {
                self.schedule_frame(frame, length, options, &mut extra, &mut queued)?;
            }
            if above < length {
                self.schedule_frame(above, length, options, &mut extra, &mut queued)?;
            }
            distance += 1;
        }

        Ok((required, extra))
    }

    fn schedule_frame(
        &self,
        frame: usize,
        length: usize,
        options: &EstimateOptions,
        queue: &mut VecDeque<Task>,
        queued: &mut HashSet<Task>,
    ) -> Result<()> {
        let covered = |frame: usize| {
            if self.still_poses.contains_key(&frame) {
                return true;
            }
            options.needs_zoom(frame) && self.unzoomed_still_poses.contains_key(&frame)
        };

        if options.needs_zoom(frame) {
            if self.still_poses.contains_key(&frame) {
                return Ok(());
            }
            let (left, right) = get_zoom_lr(frame, length, options.zoom_range)?;
            for j in left..=right {
                let task = Task {
                    frame: j,
                    zoomed: false,
                };
                if !covered(j) && queued.insert(task) {
                    queue.push_back(task);
                }
            }
            let task = Task {
                frame,
                zoomed: true,
            };
            if queued.insert(task) {
                queue.push_back(task);
            }
        } else if !covered(frame) {
            let task = Task {
                frame,
                zoomed: false,
            };
            if queued.insert(task) {
                queue.push_back(task);
            }
        }
        Ok(())
    }

    fn run_parallel<S, Z>(
        &mut self,
        pos: usize,
        length: usize,
        options: &EstimateOptions,
        still_estimators: &mut [S],
        zoom_still_estimators: &mut [Z],
        image_callback: &ImageCallback<'_>,
    ) -> Result<()>
    where
        S: StillEstimator + Send,
        Z: StillEstimator + Send,
    {
        let (required, extra) = self.build_queues(pos, length, options)?;
        debug!(
            required = required.len(),
            extra = extra.len(),
            workers = still_estimators.len(),
            "scheduling still estimations"
        );

        let worker_count = still_estimators.len();
        let scheduler = Scheduler {
            state: Mutex::new(SchedulerState {
                unzoomed: std::mem::take(&mut self.unzoomed_still_poses),
                finals: std::mem::take(&mut self.still_poses),
                required,
                extra,
                reported: 0,
                round: 0,
                terminate: false,
                error: None,
            }),
            round_cv: Condvar::new(),
            report_cv: Condvar::new(),
            options,
            length,
            image_callback,
        };

        thread::scope(|scope| {
            for (still, zoom_still) in still_estimators
                .iter_mut()
                .zip(zoom_still_estimators.iter_mut())
            {
                let scheduler = &scheduler;
                scope.spawn(move || scheduler.worker(still, zoom_still));
            }
            scheduler.coordinate(worker_count);
        });

        let state = scheduler
            .state
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        self.unzoomed_still_poses = state.unzoomed;
        self.still_poses = state.finals;

        match state.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
