use serde::{Deserialize, Serialize};

/// 位置比較の許容誤差（メートル）
///
/// 補間や格子探索で生成される座標を同一視するために使用します。
pub const POSITION_TOLERANCE_M: f64 = 0.1;

/// 建物内の3次元位置
///
/// x, y は床面上の座標、z は高さ（メートル）です。`floor` は z と
/// 階高から導出される階番号で、z と常に整合している必要があります。
/// 生成後は変更されません（更新は新しい値の生成で行います）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    x: f64,
    y: f64,
    z: f64,
    floor: u32,
}

impl Position {
    /// 座標と階番号を直接指定して位置を作成
    ///
    /// 呼び出し側が z と `floor` の整合を保証する場合に使用します。
    pub fn new(x: f64, y: f64, z: f64, floor: u32) -> Self {
        Self { x, y, z, floor }
    }

    /// 指定した階の床面上の位置を作成（z = 階番号 × 階高）
    pub fn on_floor(x: f64, y: f64, floor: u32, floor_height: f64) -> Self {
        Self::new(x, y, floor as f64 * floor_height, floor)
    }

    /// 高さから階番号を導出して位置を作成
    ///
    /// 階段移動中の中間高さは最も近い階に丸められます。
    pub fn from_height(x: f64, y: f64, z: f64, floor_height: f64) -> Self {
        let floor = if floor_height > 0.0 {
            (z / floor_height).round().max(0.0) as u32
        } else {
            0
        };
        Self::new(x, y, z, floor)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    /// 3次元ユークリッド距離を計算
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// XY平面での2次元距離を計算
    pub fn distance_xy(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 目標位置に向かって指定距離だけ直線移動した位置を返す
    ///
    /// 移動距離が目標までの距離以上の場合は目標位置そのものを返します。
    ///
    /// # 引数
    ///
    /// * `target` - 目標位置
    /// * `step` - 移動距離（メートル）
    /// * `floor_height` - 階番号の再計算に使用する階高
    pub fn step_towards(&self, target: &Position, step: f64, floor_height: f64) -> Position {
        let distance = self.distance_to(target);
        if distance <= step || distance < 1e-9 {
            return *target;
        }

        let ratio = step / distance;
        Position::from_height(
            self.x + (target.x - self.x) * ratio,
            self.y + (target.y - self.y) * ratio,
            self.z + (target.z - self.z) * ratio,
            floor_height,
        )
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.floor == other.floor
            && (self.x - other.x).abs() < POSITION_TOLERANCE_M
            && (self.y - other.y).abs() < POSITION_TOLERANCE_M
            && (self.z - other.z).abs() < POSITION_TOLERANCE_M
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1}) {}F", self.x, self.y, self.z, self.floor)
    }
}

/// 格子セルの区画種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// 廊下
    Hallway,
    /// 一般の部屋
    Room,
    /// 階段室（上下階への接続点）
    Stairwell,
    /// 出口（1階外周）
    Exit,
    /// 過去の失敗から危険と判明した区画
    DangerZone,
}
