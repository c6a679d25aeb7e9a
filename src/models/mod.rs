// 基本的なデータ型（位置・区画種別）
pub mod common;

// エージェント・危険源・描画通知のインターフェース（trait）定義
pub mod traits;

// 建物モデルと各エージェントの実装
pub mod nav_graph;
pub mod hazard;
pub mod rescue_agent;
pub mod mission;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use nav_graph::{BuildingLayout, NavEdge, NavGraph, NavGraphError, NavNode};
pub use hazard::{
    AttackerZone, FireIncidenceHint, FireSpreadParams, FireZone, HazardField, HazardKind, HazardSource,
    ZoneSnapshot,
};
pub use rescue_agent::{AgentConfig, AgentPhase, AgentState, DeathCause, RescueAgent, StepOutcome};
pub use mission::{FailureReason, Mission};
