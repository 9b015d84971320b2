use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::score::Connection;

/// 見逃した動きの記録 (継続フレーム数, 平均スコア)
pub type MissedMove = (u32, u8);

struct Track {
    end: u32,
    start: u32,
    /// 最後に閾値を下回った時点までのスコア合計（確定用）
    frozen_sum: u64,
    /// 現在フレームまでのスコア合計
    running_sum: u64,
}

/// スコア列から「見逃した動き」を検出する
///
/// 接続ごとに、スコアが `threshold` を下回る連続区間を追跡する。
/// 区間の平均スコアが閾値まで回復した時点（または列の終端）で確定し、
/// 区間が終わったフレームの位置に記録される。フレームに現れない接続は
/// スコア 128 相当として平均に算入する。128 を超える入力は 128 に丸める
pub fn missed_moves(
    score_list: &[BTreeMap<Connection, u8>],
    threshold: u8,
) -> Result<Vec<BTreeMap<Connection, MissedMove>>> {
    if score_list.len() > (u32::MAX - 4) as usize {
        return Err(Error::Overflow(score_list.len()));
    }

    let threshold = threshold as u64;

    let mut track: BTreeMap<Connection, Track> = BTreeMap::new();
    // (end, start, frozen_sum, connection) の昇順で確定レコードを保持する
    let mut record: BTreeMap<(u32, u32, u64, Connection), ()> = BTreeMap::new();

    for (i, frame) in score_list.iter().enumerate() {
        let i = i as u32;

        // このフレームに現れない接続には 128 を積む。平均が閾値に達するなら確定
        track.retain(|&connection, state| {
            if frame.contains_key(&connection) {
                return true;
            }
            if state.running_sum + 128 < threshold * (i - state.start + 1) as u64 {
                state.running_sum += 128;
                true
            } else {
                record.insert((state.end, state.start, state.frozen_sum, connection), ());
                false
            }
        });

        for (&connection, &raw_score) in frame {
            let part_score = raw_score.min(128) as u64;

            match track.get_mut(&connection) {
                Some(state) => {
                    if part_score < threshold {
                        state.end = i;
                        state.running_sum += part_score;
                        state.frozen_sum = state.running_sum;
                    } else if state.running_sum + part_score
                        < threshold * (i - state.start + 1) as u64
                    {
                        state.running_sum += part_score;
                    } else {
                        record.insert((state.end, state.start, state.frozen_sum, connection), ());
                        track.remove(&connection);
                    }
                }
                None => {
                    if part_score < threshold {
                        track.insert(
                            connection,
                            Track {
                                end: i,
                                start: i,
                                frozen_sum: part_score,
                                running_sum: part_score,
                            },
                        );
                    }
                }
            }
        }
    }

    // 終端まで回復しなかった区間をすべて確定する
    for (connection, state) in track {
        record.insert((state.end, state.start, state.frozen_sum, connection), ());
    }

    let mut moves = Vec::with_capacity(score_list.len());
    let mut records = record.into_keys().peekable();
    for i in 0..score_list.len() as u32 {
        let mut frame_moves = BTreeMap::new();
        while records.peek().map_or(false, |&(end, _, _, _)| end == i) {
            let Some((end, start, frozen_sum, connection)) = records.next() else {
                break;
            };
            let length = end - start + 1;
            let mean = (frozen_sum / length as u64).min(128) as u8;
            frame_moves.insert(connection, (length, mean));
        }
        moves.push(frame_moves);
    }

    Ok(moves)
}
