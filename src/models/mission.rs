use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::rescue_agent::AgentState;

/// ミッション失敗の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 全エージェントが行動不能
    AllAgentsDied,
    /// 制限時間超過
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::AllAgentsDied => "all_agents_died",
            FailureReason::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1回の救助ミッションの記録
///
/// 終了条件の成立時に `finalize` で1回だけ生成され、以後は変更されません。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub reason_failed: Option<FailureReason>,
    /// シミュレーション上の経過時間（秒）
    pub total_time: f64,
    /// 全参加エージェントの最終状態（登録順）
    pub agents: Vec<AgentState>,
}

impl Mission {
    /// 終了したミッションの記録を作成
    ///
    /// # 引数
    ///
    /// * `mission_id` - ミッションID
    /// * `scenario` - シナリオ名
    /// * `started_at` - 開始時刻（実時間）
    /// * `reason_failed` - 失敗理由（成功時はNone）
    /// * `total_time` - シミュレーション経過時間
    /// * `agents` - 全エージェントの最終状態
    pub fn finalize(
        mission_id: String,
        scenario: String,
        started_at: DateTime<Utc>,
        reason_failed: Option<FailureReason>,
        total_time: f64,
        agents: Vec<AgentState>,
    ) -> Self {
        Self {
            mission_id,
            scenario,
            started_at,
            ended_at: Utc::now(),
            success: reason_failed.is_none(),
            reason_failed,
            total_time,
            agents,
        }
    }

    /// 救助目標に到達した生存エージェント
    pub fn rescuers(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.iter().filter(|a| a.rescued && a.is_alive)
    }

    /// 行動不能になったエージェント
    pub fn casualties(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.iter().filter(|a| !a.is_alive)
    }
}
