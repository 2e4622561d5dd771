//! Club del Trekking operations on top of [`ClubTrekkingMembership`].
//!
//! Every operation is a read-modify-write of one membership record. Saves
//! are conditional on the version that was read; on a conflict the whole
//! operation is replayed against the fresh record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::events::{DomainEvent, EventBus};
use crate::models::membership::{MembershipError, DEFAULT_WEEKLY_LIMIT};
use crate::models::{
    AttendanceOutcome, ClubTrekkingMembership, HistorialSalida, MembershipStats,
    MembershipSummary, PenaltyView,
};
use crate::store::{MembershipStore, StoreError, LIVE_MEMBERSHIP_CONSTRAINT};

const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub reset: bool,
    pub salidas_realizadas: u32,
    pub ultima_reset_fecha: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConfirmations {
    pub salidas_pendientes: Vec<HistorialSalida>,
    pub penalizacion: PenaltyView,
}

pub struct MembershipService {
    store: Arc<dyn MembershipStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_weekly_limit: u32,
}

impl MembershipService {
    pub fn new(store: Arc<dyn MembershipStore>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
            default_weekly_limit: DEFAULT_WEEKLY_LIMIT,
        }
    }

    pub fn with_weekly_limit(mut self, limit: u32) -> Self {
        self.default_weekly_limit = limit;
        self
    }

    /// Loads the user's live membership, applies `op`, and persists the
    /// result if anything changed.
    async fn mutate<T, F>(&self, user_id: Uuid, mut op: F) -> Result<T, MembershipError>
    where
        T: Send,
        F: FnMut(&mut ClubTrekkingMembership, DateTime<Utc>) -> Result<T, MembershipError> + Send,
    {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let now = self.clock.now();
            let Some(mut membership) = self.store.find_live_by_user(user_id).await? else {
                return Err(MembershipError::NoActiveMembership);
            };
            let original = membership.clone();

            let refreshed = membership.refresh(now);
            let result = membership.ensure_live().and_then(|()| op(&mut membership, now));

            // A failed operation still persists time-driven transitions.
            if result.is_err() && !refreshed {
                return result;
            }
            if result.is_ok() && membership == original {
                return result;
            }
            if result.is_err() {
                membership = original.clone();
                membership.refresh(now);
            }

            membership.updated_at = now;
            match self.store.save(&membership).await {
                Ok(_) => return result,
                Err(StoreError::VersionConflict) => {
                    tracing::debug!(%user_id, attempt, "Membership changed concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(%user_id, "Membership update kept conflicting, giving up");
        Err(StoreError::VersionConflict.into())
    }

    /// Creates an `activa` membership after a subscription purchase.
    pub async fn suscribir(
        &self,
        user_id: Uuid,
        limite_semanal: Option<u32>,
    ) -> Result<ClubTrekkingMembership, MembershipError> {
        // Let a lapsed membership expire before checking for an existing one.
        match self.mutate(user_id, |_, _| Ok(())).await {
            Ok(()) => return Err(MembershipError::MembershipExists),
            Err(MembershipError::NoActiveMembership) => {}
            Err(err) => return Err(err),
        }

        let membership = ClubTrekkingMembership::new(
            user_id,
            limite_semanal.unwrap_or(self.default_weekly_limit),
            self.clock.now(),
        );

        match self.store.insert(&membership).await {
            Ok(()) => {
                tracing::info!(%user_id, membership_id = %membership.id, "Membership activated");
                Ok(membership)
            }
            Err(StoreError::UniqueViolation(constraint))
                if constraint == LIVE_MEMBERSHIP_CONSTRAINT =>
            {
                Err(MembershipError::MembershipExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn confirmar_asistencia(
        &self,
        user_id: Uuid,
        salida_id: Uuid,
        asistio: bool,
    ) -> Result<AttendanceOutcome, MembershipError> {
        let (outcome, membership_id, until) = self
            .mutate(user_id, |membership, now| {
                let outcome = membership.confirmar_asistencia(salida_id, asistio, now)?;
                Ok((outcome, membership.id, membership.penalizacion.fecha_fin))
            })
            .await?;

        tracing::info!(
            %user_id,
            %salida_id,
            asistio,
            inasistencias = outcome.inasistencias_consecutivas,
            "Attendance confirmed"
        );

        if outcome.penalizacion_aplicada {
            if let Some(until) = until {
                tracing::info!(%user_id, %until, "Penalty applied");
                self.events.publish(DomainEvent::PenaltyApplied {
                    membership_id,
                    user_id,
                    until,
                });
            }
        }

        Ok(outcome)
    }

    pub async fn resetear_contador_mensual(&self, user_id: Uuid) -> Result<ResetOutcome, MembershipError> {
        self.mutate(user_id, |membership, now| {
            let reset = membership.resetear_contador_mensual(now);
            Ok(ResetOutcome {
                reset,
                salidas_realizadas: membership.uso_mensual.salidas_realizadas,
                ultima_reset_fecha: membership.uso_mensual.ultima_reset_fecha,
            })
        })
        .await
    }

    pub async fn tiene_penalizacion_activa(&self, user_id: Uuid) -> Result<PenaltyView, MembershipError> {
        self.mutate(user_id, |membership, now| Ok(membership.penalizacion.view(now)))
            .await
    }

    pub async fn salidas_pendientes(&self, user_id: Uuid) -> Result<PendingConfirmations, MembershipError> {
        self.mutate(user_id, |membership, now| {
            Ok(PendingConfirmations {
                salidas_pendientes: membership.salidas_pendientes(now),
                penalizacion: membership.penalizacion.view(now),
            })
        })
        .await
    }

    /// Books a salida against the weekly quota (check-in bookkeeping).
    pub async fn registrar_salida(
        &self,
        user_id: Uuid,
        salida_id: Uuid,
        fecha: DateTime<Utc>,
        check_in_realizado: bool,
    ) -> Result<MembershipSummary, MembershipError> {
        let summary = self
            .mutate(user_id, |membership, now| {
                membership.resetear_contador_mensual(now);
                membership.registrar_salida(salida_id, fecha, check_in_realizado, now)?;
                Ok(membership.summary(now))
            })
            .await?;

        tracing::info!(%user_id, %salida_id, "Salida recorded on membership");
        Ok(summary)
    }

    /// Current membership view; also applies the weekly reset.
    pub async fn estado(&self, user_id: Uuid) -> Result<MembershipSummary, MembershipError> {
        self.mutate(user_id, |membership, now| {
            membership.resetear_contador_mensual(now);
            Ok(membership.summary(now))
        })
        .await
    }

    pub async fn estadisticas(&self, user_id: Uuid) -> Result<MembershipStats, MembershipError> {
        self.mutate(user_id, |membership, now| {
            membership.resetear_contador_mensual(now);
            Ok(membership.stats(now))
        })
        .await
    }

    pub async fn pausar(&self, user_id: Uuid) -> Result<MembershipSummary, MembershipError> {
        self.mutate(user_id, |membership, now| {
            membership.pausar()?;
            Ok(membership.summary(now))
        })
        .await
    }

    pub async fn reanudar(&self, user_id: Uuid) -> Result<MembershipSummary, MembershipError> {
        self.mutate(user_id, |membership, now| {
            membership.reanudar()?;
            Ok(membership.summary(now))
        })
        .await
    }

    pub async fn renovar(&self, user_id: Uuid) -> Result<MembershipSummary, MembershipError> {
        self.mutate(user_id, |membership, now| {
            membership.renovar(now)?;
            Ok(membership.summary(now))
        })
        .await
    }

    pub async fn cancelar(&self, user_id: Uuid, motivo: &str) -> Result<MembershipSummary, MembershipError> {
        let summary = self
            .mutate(user_id, |membership, now| {
                membership.cancelar(motivo, now)?;
                Ok(membership.summary(now))
            })
            .await?;

        tracing::info!(%user_id, membership_id = %summary.id, motivo, "Membership cancelled");
        self.events.publish(DomainEvent::MembershipCancelled {
            membership_id: summary.id,
            user_id,
        });
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::MembershipStatus;
    use crate::store::MemoryMembershipStore;
    use chrono::{Duration, TimeZone};

    struct Harness {
        service: Arc<MembershipService>,
        store: MemoryMembershipStore,
        clock: ManualClock,
        events: EventBus,
    }

    fn harness() -> Harness {
        let store = MemoryMembershipStore::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap());
        let events = EventBus::default();
        let service = MembershipService::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            events.clone(),
        )
        .with_weekly_limit(3);

        Harness {
            service: Arc::new(service),
            store,
            clock,
            events,
        }
    }

    async fn member_with_salidas(h: &Harness, count: usize) -> (Uuid, Vec<Uuid>) {
        let user = Uuid::new_v4();
        h.service.suscribir(user, None).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let id = Uuid::new_v4();
            let fecha = h.clock.now() + Duration::hours(1 + i as i64);
            h.service.registrar_salida(user, id, fecha, false).await.unwrap();
            ids.push(id);
        }
        (user, ids)
    }

    #[tokio::test]
    async fn test_absence_scenario_applies_penalty_on_second_absence() {
        let h = harness();
        let mut events = h.events.subscribe();
        let (user, ids) = member_with_salidas(&h, 3).await;
        h.clock.advance(Duration::days(1));

        let a = h.service.confirmar_asistencia(user, ids[0], false).await.unwrap();
        assert_eq!(a.inasistencias_consecutivas, 1);
        assert!(!a.penalizacion_aplicada);

        let b = h.service.confirmar_asistencia(user, ids[1], false).await.unwrap();
        assert_eq!(b.inasistencias_consecutivas, 2);
        assert!(b.penalizacion_aplicada);
        assert_eq!(b.dias_restantes, 3);
        assert!(matches!(
            events.recv().await.unwrap(),
            DomainEvent::PenaltyApplied { user_id, .. } if user_id == user
        ));

        let c = h.service.confirmar_asistencia(user, ids[2], true).await.unwrap();
        assert_eq!(c.inasistencias_consecutivas, 0);
        assert!(c.penalizacion_activa);
        assert_eq!(c.dias_restantes, 3);

        let view = h.service.tiene_penalizacion_activa(user).await.unwrap();
        assert!(view.activa);

        h.clock.advance(Duration::days(3));
        let view = h.service.tiene_penalizacion_activa(user).await.unwrap();
        assert!(!view.activa);
        assert_eq!(view.dias_restantes, 0);
    }

    #[tokio::test]
    async fn test_absences_after_lapsed_penalty_penalize_again() {
        let h = harness();
        let (user, ids) = member_with_salidas(&h, 3).await;
        h.clock.advance(Duration::days(1));

        h.service.confirmar_asistencia(user, ids[0], false).await.unwrap();
        let first = h.service.confirmar_asistencia(user, ids[1], false).await.unwrap();
        assert!(first.penalizacion_aplicada);

        h.clock.advance(Duration::days(4));
        assert!(!h.service.tiene_penalizacion_activa(user).await.unwrap().activa);

        let again = h.service.confirmar_asistencia(user, ids[2], false).await.unwrap();
        assert!(again.penalizacion_aplicada);
        assert!(again.penalizacion_activa);
        assert_eq!(again.inasistencias_consecutivas, 3);

        let stored = h.store.find_live_by_user(user).await.unwrap().unwrap();
        assert_eq!(stored.penalizacion.historial.len(), 2);
    }

    #[tokio::test]
    async fn test_estadisticas_reflects_history() {
        let h = harness();
        let (user, _) = member_with_salidas(&h, 2).await;

        let stats = h.service.estadisticas(user).await.unwrap();
        assert_eq!(stats.total_salidas, 2);
        assert_eq!(stats.total_salidas_con_check_in, 0);
        assert_eq!(stats.salidas_este_mes, 2);
        assert_eq!(stats.membership.salidas_restantes, 1);

        assert!(matches!(
            h.service.estadisticas(Uuid::new_v4()).await,
            Err(MembershipError::NoActiveMembership)
        ));
    }

    #[tokio::test]
    async fn test_reset_mutates_only_once_per_period() {
        let h = harness();
        let (user, _) = member_with_salidas(&h, 2).await;

        h.clock.advance(Duration::days(5));
        let first = h.service.resetear_contador_mensual(user).await.unwrap();
        assert!(first.reset);
        assert_eq!(first.salidas_realizadas, 0);

        let membership = h.store.find_live_by_user(user).await.unwrap().unwrap();
        let version = membership.version;

        let second = h.service.resetear_contador_mensual(user).await.unwrap();
        assert!(!second.reset);
        let membership = h.store.find_live_by_user(user).await.unwrap().unwrap();
        assert_eq!(membership.version, version);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_of_same_salida() {
        let h = harness();
        let (user, ids) = member_with_salidas(&h, 1).await;
        h.clock.advance(Duration::days(1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&h.service);
            let salida = ids[0];
            handles.push(tokio::spawn(async move {
                service.confirmar_asistencia(user, salida, false).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(MembershipError::NoSuchPendingConfirmation) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);

        let membership = h.store.find_live_by_user(user).await.unwrap().unwrap();
        assert_eq!(membership.penalizacion.inasistencias_consecutivas, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_of_different_salidas_all_land() {
        let h = harness();
        let (user, ids) = member_with_salidas(&h, 3).await;
        h.clock.advance(Duration::days(1));

        let mut handles = Vec::new();
        for salida in ids.clone() {
            let service = Arc::clone(&h.service);
            handles.push(tokio::spawn(async move {
                service.confirmar_asistencia(user, salida, true).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let pending = h.service.salidas_pendientes(user).await.unwrap();
        assert!(pending.salidas_pendientes.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_membership_rejects_operations() {
        let h = harness();
        let (user, ids) = member_with_salidas(&h, 1).await;
        h.service.cancelar(user, "sin tiempo").await.unwrap();
        h.clock.advance(Duration::days(1));

        assert!(matches!(
            h.service.confirmar_asistencia(user, ids[0], true).await,
            Err(MembershipError::NoActiveMembership)
        ));
        assert!(matches!(
            h.service.resetear_contador_mensual(user).await,
            Err(MembershipError::NoActiveMembership)
        ));
        assert!(matches!(
            h.service.salidas_pendientes(user).await,
            Err(MembershipError::NoActiveMembership)
        ));

        // A new subscription is allowed once the old one is cancelled.
        let renewed = h.service.suscribir(user, Some(2)).await.unwrap();
        assert_eq!(renewed.uso_mensual.limite_semanal, 2);
    }

    #[tokio::test]
    async fn test_subscribing_twice_is_rejected() {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.suscribir(user, None).await.unwrap();
        assert!(matches!(
            h.service.suscribir(user, None).await,
            Err(MembershipError::MembershipExists)
        ));
    }

    #[tokio::test]
    async fn test_expired_membership_is_persisted_as_vencida() {
        let h = harness();
        let user = Uuid::new_v4();
        let membership = h.service.suscribir(user, None).await.unwrap();

        h.clock.advance(Duration::days(40));
        assert!(matches!(
            h.service.estado(user).await,
            Err(MembershipError::NoActiveMembership)
        ));

        let stored = h.store.get(membership.id).unwrap();
        assert_eq!(stored.estado, MembershipStatus::Vencida);
    }

    #[tokio::test]
    async fn test_paused_membership_cannot_book_but_can_confirm() {
        let h = harness();
        let (user, ids) = member_with_salidas(&h, 1).await;
        h.service.pausar(user).await.unwrap();
        h.clock.advance(Duration::days(1));

        assert!(matches!(
            h.service
                .registrar_salida(user, Uuid::new_v4(), h.clock.now(), false)
                .await,
            Err(MembershipError::InvalidTransition { .. })
        ));
        h.service.confirmar_asistencia(user, ids[0], true).await.unwrap();

        let summary = h.service.reanudar(user).await.unwrap();
        assert_eq!(summary.estado, MembershipStatus::Activa);
    }

    #[tokio::test]
    async fn test_renewal_keeps_membership_live() {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.suscribir(user, None).await.unwrap();

        h.clock.advance(Duration::days(25));
        h.service.renovar(user).await.unwrap();
        h.clock.advance(Duration::days(15));

        let summary = h.service.estado(user).await.unwrap();
        assert_eq!(summary.estado, MembershipStatus::Activa);
    }
}
