use crate::models::{
    common::Position,
    hazard::{HazardKind, HazardSource},
    rescue_agent::AgentState,
};

/// ミッションに参加するエージェントの基本インターフェース
pub trait IAgent {
    /// エージェントIDの取得
    fn get_id(&self) -> String;

    /// エージェントがまだ行動中かどうか（生存かつ未到達）
    fn is_active(&self) -> bool;

    /// 現在位置の取得
    fn get_position(&self) -> Position;
}

/// 危険源（火災・襲撃者）のインターフェース
pub trait IHazard {
    /// 危険源の種類
    fn kind(&self) -> HazardKind;

    /// 危険領域の中心位置
    fn center(&self) -> Position;

    /// 危険領域の半径（メートル）
    fn radius(&self) -> f64;

    /// 強度 [0, 1]
    fn intensity(&self) -> f64;

    /// 経過時間分だけ状態を進める（延焼・巡回）
    fn advance(&mut self, dt: f64);

    /// 指定位置での危険度
    ///
    /// 半径内では `強度 × (1 − 距離/半径)`、半径外では0です。
    fn danger_at(&self, position: &Position) -> f64 {
        let radius = self.radius();
        if radius <= 0.0 {
            return 0.0;
        }
        let distance = position.distance_to(&self.center());
        if distance <= radius {
            self.intensity() * (1.0 - distance / radius)
        } else {
            0.0
        }
    }
}

/// 描画側コラボレーターへのティック通知インターフェース
///
/// コントローラは各ティックの全エージェント処理後に呼び出します。
/// 描画の完了を待つことはありません。
pub trait ITickObserver {
    fn on_tick(&mut self, time: f64, zones: &[HazardSource], agents: &[&AgentState]);
}
