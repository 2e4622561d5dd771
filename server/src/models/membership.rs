//! Club del Trekking membership and its attendance/penalty rules.
//!
//! Every rule takes `now` explicitly; nothing here reads the wall clock.

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Default number of salidas a member may book per week.
pub const DEFAULT_WEEKLY_LIMIT: u32 = 2;
/// Consecutive confirmed absences that trigger a penalty.
pub const ABSENCES_FOR_PENALTY: u32 = 2;
/// Length of a penalty window, in days.
pub const PENALTY_DAYS: i64 = 3;
/// Total salidas needed for the silver and gold badges.
pub const PLATA_MIN_SALIDAS: usize = 10;
pub const ORO_MIN_SALIDAS: usize = 25;
/// Largest gap, in days, that keeps an activity streak going.
const STREAK_GAP_DAYS: i64 = 7;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Activa,
    Pausada,
    Vencida,
    Cancelada,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Activa => "activa",
            MembershipStatus::Pausada => "pausada",
            MembershipStatus::Vencida => "vencida",
            MembershipStatus::Cancelada => "cancelada",
        }
    }

    /// `activa` and `pausada` memberships still accept operations.
    pub fn is_live(&self) -> bool {
        matches!(self, MembershipStatus::Activa | MembershipStatus::Pausada)
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activa" => Ok(MembershipStatus::Activa),
            "pausada" => Ok(MembershipStatus::Pausada),
            "vencida" => Ok(MembershipStatus::Vencida),
            "cancelada" => Ok(MembershipStatus::Cancelada),
            other => Err(format!("unknown membership status '{}'", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("No active membership")]
    NoActiveMembership,

    #[error("Salida is not pending attendance confirmation")]
    NoSuchPendingConfirmation,

    #[error("Booking suspended for {dias_restantes} more day(s)")]
    PenaltyActive { dias_restantes: i64 },

    #[error("Weekly limit of {limite} salida(s) reached")]
    WeeklyLimitReached { limite: u32 },

    #[error("Salida already recorded for this membership")]
    SalidaAlreadyRecorded,

    #[error("A live membership already exists for this user")]
    MembershipExists,

    #[error("Cannot {action} a membership in state '{from}'")]
    InvalidTransition {
        from: MembershipStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsoMensual {
    pub salidas_realizadas: u32,
    pub limite_semanal: u32,
    pub ultima_reset_fecha: DateTime<Utc>,
}

/// One recorded outing. `asistencia_confirmada == None` means the member has
/// not yet said whether they showed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorialSalida {
    pub salida_id: Uuid,
    pub fecha: DateTime<Utc>,
    pub check_in_realizado: bool,
    pub asistencia_confirmada: Option<bool>,
    pub fecha_confirmacion: Option<DateTime<Utc>>,
}

impl HistorialSalida {
    pub fn is_pending_confirmation(&self, now: DateTime<Utc>) -> bool {
        self.asistencia_confirmada.is_none() && self.fecha < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyRecord {
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub motivo: String,
    pub inasistencias_consecutivas: u32,
}

/// Penalty window. Remaining days are derived from `fecha_fin` on every read,
/// so no job has to decrement anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Penalizacion {
    pub activa: bool,
    pub fecha_inicio: Option<DateTime<Utc>>,
    pub fecha_fin: Option<DateTime<Utc>>,
    pub inasistencias_consecutivas: u32,
    pub historial: Vec<PenaltyRecord>,
}

impl Penalizacion {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.activa && self.fecha_fin.is_some_and(|fin| now < fin)
    }

    /// Whole days left in the window, rounded up. Zero once it has lapsed.
    pub fn dias_restantes(&self, now: DateTime<Utc>) -> i64 {
        match self.fecha_fin {
            Some(fin) if self.is_active_at(now) => {
                let seconds = (fin - now).num_seconds();
                (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
            }
            _ => 0,
        }
    }

    fn activar(&mut self, now: DateTime<Utc>) {
        let fin = now + Duration::days(PENALTY_DAYS);
        self.activa = true;
        self.fecha_inicio = Some(now);
        self.fecha_fin = Some(fin);
        self.historial.push(PenaltyRecord {
            fecha_inicio: now,
            fecha_fin: fin,
            motivo: format!(
                "{} inasistencias consecutivas",
                self.inasistencias_consecutivas
            ),
            inasistencias_consecutivas: self.inasistencias_consecutivas,
        });
    }

    pub fn view(&self, now: DateTime<Utc>) -> PenaltyView {
        let activa = self.is_active_at(now);
        PenaltyView {
            activa,
            dias_restantes: self.dias_restantes(now),
            fecha_fin: if activa { self.fecha_fin } else { None },
            inasistencias_consecutivas: self.inasistencias_consecutivas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyView {
    pub activa: bool,
    pub dias_restantes: i64,
    pub fecha_fin: Option<DateTime<Utc>>,
    pub inasistencias_consecutivas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOutcome {
    pub asistio: bool,
    /// True only on the call that activated the penalty.
    pub penalizacion_aplicada: bool,
    pub penalizacion_activa: bool,
    pub dias_restantes: i64,
    pub inasistencias_consecutivas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSummary {
    pub id: Uuid,
    pub estado: MembershipStatus,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub proxima_fecha_pago: DateTime<Utc>,
    pub salidas_realizadas: u32,
    pub limite_semanal: u32,
    pub salidas_esta_semana: usize,
    pub penalizacion: PenaltyView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeTier {
    Bronce,
    Plata,
    Oro,
}

impl BadgeTier {
    pub fn for_total(total_salidas: usize) -> Self {
        if total_salidas >= ORO_MIN_SALIDAS {
            BadgeTier::Oro
        } else if total_salidas >= PLATA_MIN_SALIDAS {
            BadgeTier::Plata
        } else {
            BadgeTier::Bronce
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            BadgeTier::Bronce => "#CD7F32",
            BadgeTier::Plata => "#C0C0C0",
            BadgeTier::Oro => "#FFD700",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub tipo: BadgeTier,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipStatsPeriod {
    pub estado: MembershipStatus,
    pub fecha_inicio: DateTime<Utc>,
    pub salidas_restantes: u32,
}

/// Activity figures shown on the member's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipStats {
    pub total_salidas: usize,
    pub total_salidas_con_check_in: usize,
    pub salidas_este_mes: usize,
    /// Salidas in the current streak, walking back from today while each gap
    /// stays within a week.
    pub dias_consecutivos: usize,
    pub badge: Badge,
    pub membership: MembershipStatsPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubTrekkingMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub estado: MembershipStatus,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub proxima_fecha_pago: DateTime<Utc>,
    pub uso_mensual: UsoMensual,
    pub historial_salidas: Vec<HistorialSalida>,
    pub penalizacion: Penalizacion,
    pub fecha_cancelacion: Option<DateTime<Utc>>,
    pub motivo_cancelacion: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Start of the booking week containing `at`: Sunday 00:00 UTC.
pub fn week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_sunday = i64::from(at.weekday().num_days_from_sunday());
    let date = at.date_naive() - Duration::days(days_since_sunday);
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn one_month_after(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or(at + Duration::days(30))
}

impl ClubTrekkingMembership {
    /// A freshly purchased membership covering one month from `now`.
    pub fn new(user_id: Uuid, limite_semanal: u32, now: DateTime<Utc>) -> Self {
        let fin = one_month_after(now);
        Self {
            id: Uuid::new_v4(),
            user_id,
            estado: MembershipStatus::Activa,
            fecha_inicio: now,
            fecha_fin: fin,
            proxima_fecha_pago: fin,
            uso_mensual: UsoMensual {
                salidas_realizadas: 0,
                limite_semanal,
                ultima_reset_fecha: week_start(now),
            },
            historial_salidas: Vec::new(),
            penalizacion: Penalizacion::default(),
            fecha_cancelacion: None,
            motivo_cancelacion: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies time-driven transitions: expiry of the period and lapse of a
    /// penalty window. Returns whether anything changed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if self.estado.is_live() && now >= self.fecha_fin {
            self.estado = MembershipStatus::Vencida;
            changed = true;
        }

        if self.penalizacion.activa && !self.penalizacion.is_active_at(now) {
            self.penalizacion.activa = false;
            changed = true;
        }

        changed
    }

    pub fn ensure_live(&self) -> Result<(), MembershipError> {
        if self.estado.is_live() {
            Ok(())
        } else {
            Err(MembershipError::NoActiveMembership)
        }
    }

    /// Recorded salidas whose date has passed and that still await a
    /// confirmation from the member.
    pub fn salidas_pendientes(&self, now: DateTime<Utc>) -> Vec<HistorialSalida> {
        self.historial_salidas
            .iter()
            .filter(|salida| salida.is_pending_confirmation(now))
            .cloned()
            .collect()
    }

    pub fn confirmar_asistencia(
        &mut self,
        salida_id: Uuid,
        asistio: bool,
        now: DateTime<Utc>,
    ) -> Result<AttendanceOutcome, MembershipError> {
        self.ensure_live()?;

        let salida = self
            .historial_salidas
            .iter_mut()
            .find(|salida| salida.salida_id == salida_id && salida.is_pending_confirmation(now))
            .ok_or(MembershipError::NoSuchPendingConfirmation)?;

        salida.asistencia_confirmada = Some(asistio);
        salida.fecha_confirmacion = Some(now);

        let mut penalizacion_aplicada = false;
        if asistio {
            salida.check_in_realizado = true;
            self.penalizacion.inasistencias_consecutivas = 0;
        } else {
            self.penalizacion.inasistencias_consecutivas =
                self.penalizacion.inasistencias_consecutivas.saturating_add(1);

            // Absences during a running window leave it alone. Once it has
            // lapsed, the next absence on a streak penalizes again.
            if self.penalizacion.inasistencias_consecutivas >= ABSENCES_FOR_PENALTY
                && !self.penalizacion.is_active_at(now)
            {
                self.penalizacion.activar(now);
                penalizacion_aplicada = true;
            }
        }

        Ok(AttendanceOutcome {
            asistio,
            penalizacion_aplicada,
            penalizacion_activa: self.penalizacion.is_active_at(now),
            dias_restantes: self.penalizacion.dias_restantes(now),
            inasistencias_consecutivas: self.penalizacion.inasistencias_consecutivas,
        })
    }

    /// Zeroes the usage counter once per booking week. Returns whether a
    /// reset happened.
    pub fn resetear_contador_mensual(&mut self, now: DateTime<Utc>) -> bool {
        let boundary = week_start(now);
        if self.uso_mensual.ultima_reset_fecha >= boundary {
            return false;
        }

        self.uso_mensual.salidas_realizadas = 0;
        self.uso_mensual.ultima_reset_fecha = boundary;
        true
    }

    pub fn tiene_penalizacion_activa(&self, now: DateTime<Utc>) -> bool {
        self.penalizacion.is_active_at(now)
    }

    pub fn salidas_en_semana(&self, fecha: DateTime<Utc>) -> usize {
        let inicio = week_start(fecha);
        let fin = inicio + Duration::days(7);
        self.historial_salidas
            .iter()
            .filter(|salida| salida.fecha >= inicio && salida.fecha < fin)
            .count()
    }

    pub fn puede_reservar_salida(&self, fecha: DateTime<Utc>) -> bool {
        self.estado == MembershipStatus::Activa
            && self.salidas_en_semana(fecha) < self.uso_mensual.limite_semanal as usize
    }

    /// Books a salida against the membership quota.
    pub fn registrar_salida(
        &mut self,
        salida_id: Uuid,
        fecha: DateTime<Utc>,
        check_in_realizado: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MembershipError> {
        self.ensure_live()?;
        if self.estado != MembershipStatus::Activa {
            return Err(MembershipError::InvalidTransition {
                from: self.estado,
                action: "book a salida with",
            });
        }
        if self.tiene_penalizacion_activa(now) {
            return Err(MembershipError::PenaltyActive {
                dias_restantes: self.penalizacion.dias_restantes(now),
            });
        }
        if self
            .historial_salidas
            .iter()
            .any(|salida| salida.salida_id == salida_id)
        {
            return Err(MembershipError::SalidaAlreadyRecorded);
        }
        if !self.puede_reservar_salida(fecha) {
            return Err(MembershipError::WeeklyLimitReached {
                limite: self.uso_mensual.limite_semanal,
            });
        }

        self.historial_salidas.push(HistorialSalida {
            salida_id,
            fecha,
            check_in_realizado,
            asistencia_confirmada: None,
            fecha_confirmacion: None,
        });
        self.uso_mensual.salidas_realizadas += 1;
        Ok(())
    }

    pub fn pausar(&mut self) -> Result<(), MembershipError> {
        match self.estado {
            MembershipStatus::Activa => {
                self.estado = MembershipStatus::Pausada;
                Ok(())
            }
            from => Err(MembershipError::InvalidTransition {
                from,
                action: "pause",
            }),
        }
    }

    pub fn reanudar(&mut self) -> Result<(), MembershipError> {
        match self.estado {
            MembershipStatus::Pausada => {
                self.estado = MembershipStatus::Activa;
                Ok(())
            }
            from => Err(MembershipError::InvalidTransition {
                from,
                action: "resume",
            }),
        }
    }

    pub fn cancelar(&mut self, motivo: &str, now: DateTime<Utc>) -> Result<(), MembershipError> {
        self.ensure_live()?;
        self.estado = MembershipStatus::Cancelada;
        self.fecha_cancelacion = Some(now);
        self.motivo_cancelacion = Some(motivo.to_string());
        Ok(())
    }

    /// Extends the paid period by one month after a successful renewal charge.
    pub fn renovar(&mut self, now: DateTime<Utc>) -> Result<(), MembershipError> {
        self.ensure_live()?;
        let base = if self.fecha_fin > now { self.fecha_fin } else { now };
        self.fecha_fin = one_month_after(base);
        self.proxima_fecha_pago = self.fecha_fin;
        Ok(())
    }

    pub fn summary(&self, now: DateTime<Utc>) -> MembershipSummary {
        MembershipSummary {
            id: self.id,
            estado: self.estado,
            fecha_inicio: self.fecha_inicio,
            fecha_fin: self.fecha_fin,
            proxima_fecha_pago: self.proxima_fecha_pago,
            salidas_realizadas: self.uso_mensual.salidas_realizadas,
            limite_semanal: self.uso_mensual.limite_semanal,
            salidas_esta_semana: self.salidas_en_semana(now),
            penalizacion: self.penalizacion.view(now),
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> MembershipStats {
        let total_salidas = self.historial_salidas.len();
        let total_salidas_con_check_in = self
            .historial_salidas
            .iter()
            .filter(|salida| salida.check_in_realizado)
            .count();

        let today = now.date_naive();
        let month_start = today.with_day(1).unwrap_or(today);
        let salidas_este_mes = self
            .historial_salidas
            .iter()
            .filter(|salida| salida.fecha.date_naive() >= month_start)
            .count();

        let mut fechas: Vec<_> = self
            .historial_salidas
            .iter()
            .map(|salida| salida.fecha.date_naive())
            .collect();
        fechas.sort_unstable_by(|a, b| b.cmp(a));

        let mut dias_consecutivos = 0;
        let mut last = today;
        for fecha in fechas {
            if (last - fecha).num_days() > STREAK_GAP_DAYS {
                break;
            }
            dias_consecutivos += 1;
            last = fecha;
        }

        let tipo = BadgeTier::for_total(total_salidas);
        MembershipStats {
            total_salidas,
            total_salidas_con_check_in,
            salidas_este_mes,
            dias_consecutivos,
            badge: Badge {
                tipo,
                color: tipo.color(),
            },
            membership: MembershipStatsPeriod {
                estado: self.estado,
                fecha_inicio: self.fecha_inicio,
                salidas_restantes: self
                    .uso_mensual
                    .limite_semanal
                    .saturating_sub(self.uso_mensual.salidas_realizadas),
            },
        }
    }
}

/// Raw `club_trekking_memberships` row.
#[derive(Debug, Clone, FromRow)]
pub struct MembershipRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub estado: String,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub proxima_fecha_pago: DateTime<Utc>,
    pub salidas_realizadas: i32,
    pub limite_semanal: i32,
    pub ultima_reset_fecha: DateTime<Utc>,
    pub historial_salidas: Json<Vec<HistorialSalida>>,
    pub penalizacion: Json<Penalizacion>,
    pub fecha_cancelacion: Option<DateTime<Utc>>,
    pub motivo_cancelacion: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for ClubTrekkingMembership {
    type Error = String;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        let estado = row.estado.parse()?;
        let salidas_realizadas = u32::try_from(row.salidas_realizadas)
            .map_err(|_| format!("negative salidas_realizadas on {}", row.id))?;
        let limite_semanal = u32::try_from(row.limite_semanal)
            .map_err(|_| format!("negative limite_semanal on {}", row.id))?;

        Ok(ClubTrekkingMembership {
            id: row.id,
            user_id: row.user_id,
            estado,
            fecha_inicio: row.fecha_inicio,
            fecha_fin: row.fecha_fin,
            proxima_fecha_pago: row.proxima_fecha_pago,
            uso_mensual: UsoMensual {
                salidas_realizadas,
                limite_semanal,
                ultima_reset_fecha: row.ultima_reset_fecha,
            },
            historial_salidas: row.historial_salidas.0,
            penalizacion: row.penalizacion.0,
            fecha_cancelacion: row.fecha_cancelacion,
            motivo_cancelacion: row.motivo_cancelacion,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
