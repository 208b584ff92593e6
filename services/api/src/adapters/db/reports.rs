//! Content reports, their evidence, discussion and audit log.

use super::records::{EvidenceRecord, ReportCommentRecord, ReportLogRecord, ReportRecord};
use super::*;
use async_trait::async_trait;
use forum_core::ports::ReportStore;
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;

fn push_report_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ReportQuery) {
    builder.push(" WHERE TRUE");
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(assignee) = query.assigned_to {
        builder.push(" AND assigned_to = ").push_bind(db_id(assignee));
    }
    if let Some(reporter) = query.reporter_id {
        builder.push(" AND reporter_id = ").push_bind(db_id(reporter));
    }
}

/// Loads a report under a row lock and checks it can move to `next`.
async fn lock_report(
    conn: &mut PgConnection,
    id: u64,
    expected: ReportStatus,
    next: ReportStatus,
) -> PortResult<ContentReport> {
    let report = sqlx::query_as::<_, ReportRecord>("SELECT * FROM content_reports WHERE id = $1 FOR UPDATE")
        .bind(db_id(id))
        .fetch_one(conn)
        .await
        .map_err(port_err(format!("report {id}")))?
        .to_domain()?;
    if report.status != expected || !report.status.can_transition_to(next) {
        return Err(PortError::conflict(format!("report {id} is {}", report.status)));
    }
    Ok(report)
}

async fn ensure_report(conn: &mut PgConnection, id: u64) -> PortResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM content_reports WHERE id = $1)")
        .bind(db_id(id))
        .fetch_one(conn)
        .await
        .map_err(port_err(format!("report {id}")))?;
    if exists {
        Ok(())
    } else {
        Err(PortError::not_found(format!("report {id}")))
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn create_report(&self, report: NewReport) -> PortResult<ContentReport> {
        let target = report.target;
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        ensure_target(&mut *tx, target).await?;
        let stored = sqlx::query_as::<_, ReportRecord>(
            "INSERT INTO content_reports (reporter_id, target_kind, target_id, category, reason, additional_info, \
                 status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *",
        )
        .bind(db_id(report.reporter_id))
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(report.category.as_str())
        .bind(&report.reason)
        .bind(&report.additional_info)
        .bind(ReportStatus::Pending.as_str())
        .bind(report.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!(
            "user {} already has an open report on {target}",
            report.reporter_id
        )))?
        .to_domain()?;
        insert_report_log(
            &mut *tx,
            NewReportLogEntry {
                report_id: stored.id,
                actor_id: stored.reporter_id,
                action: ReportLogAction::Created,
                details: serde_json::json!({ "category": stored.category, "target": stored.target }),
                created_at: stored.created_at,
            },
        )
        .await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn get_report(&self, id: u64) -> PortResult<ContentReport> {
        sqlx::query_as::<_, ReportRecord>("SELECT * FROM content_reports WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("report {id}")))?
            .to_domain()
    }

    async fn list_reports(&self, query: &ReportQuery, page: PageRequest) -> PortResult<Page<ContentReport>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM content_reports");
        push_report_filters(&mut count, query);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(port_err("reports"))?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM content_reports");
        push_report_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows = select
            .build_query_as::<ReportRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("reports"))?;
        let items = rows
            .into_iter()
            .map(ReportRecord::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        Ok(page_of(items, total, page))
    }

    async fn add_evidence(&self, evidence: NewEvidence, log: NewReportLogEntry) -> PortResult<ReportEvidence> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        ensure_report(&mut *tx, evidence.report_id).await?;
        let stored = sqlx::query_as::<_, EvidenceRecord>(
            "INSERT INTO report_evidence (report_id, kind, content, added_by, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(db_id(evidence.report_id))
        .bind(evidence.kind.as_str())
        .bind(&evidence.content)
        .bind(db_id(evidence.added_by))
        .bind(evidence.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("report {}", evidence.report_id)))?
        .to_domain()?;
        insert_report_log(&mut *tx, log).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn list_evidence(&self, report_id: u64) -> PortResult<Vec<ReportEvidence>> {
        let rows = sqlx::query_as::<_, EvidenceRecord>("SELECT * FROM report_evidence WHERE report_id = $1 ORDER BY id")
            .bind(db_id(report_id))
            .fetch_all(&self.pool)
            .await
            .map_err(port_err(format!("evidence of report {report_id}")))?;
        rows.into_iter().map(EvidenceRecord::to_domain).collect()
    }

    async fn add_report_comment(&self, comment: NewReportComment, log: NewReportLogEntry) -> PortResult<ReportComment> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        ensure_report(&mut *tx, comment.report_id).await?;
        let stored = sqlx::query_as::<_, ReportCommentRecord>(
            "INSERT INTO report_comments (report_id, author_id, body, is_internal, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(db_id(comment.report_id))
        .bind(db_id(comment.author_id))
        .bind(&comment.body)
        .bind(comment.is_internal)
        .bind(comment.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("report {}", comment.report_id)))?
        .to_domain();
        insert_report_log(&mut *tx, log).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn list_report_comments(&self, report_id: u64, include_internal: bool) -> PortResult<Vec<ReportComment>> {
        let rows = sqlx::query_as::<_, ReportCommentRecord>(
            "SELECT * FROM report_comments WHERE report_id = $1 AND ($2 OR NOT is_internal) ORDER BY id",
        )
        .bind(db_id(report_id))
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("comments of report {report_id}")))?;
        Ok(rows.into_iter().map(ReportCommentRecord::to_domain).collect())
    }

    async fn assign_report(&self, id: u64, assignment: ReportAssignment) -> PortResult<ContentReport> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        lock_report(&mut *tx, id, assignment.expected_status, ReportStatus::InReview).await?;
        let assigned = sqlx::query_as::<_, ReportRecord>(
            "UPDATE content_reports SET status = $2, assigned_to = $3, updated_at = $4 WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(ReportStatus::InReview.as_str())
        .bind(db_id(assignment.assignee))
        .bind(assignment.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("report {id}")))?
        .to_domain()?;
        insert_report_log(&mut *tx, assignment.log).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(assigned)
    }

    async fn resolve_report(
        &self,
        id: u64,
        expected_status: ReportStatus,
        plan: ReportResolutionPlan,
    ) -> PortResult<ContentReport> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let report = lock_report(&mut *tx, id, expected_status, plan.status).await?;
        if let Some(mutation) = &plan.mutation {
            apply_mutation(&mut *tx, report.target, mutation, plan.updated_at).await?;
        }
        if let Some(action) = plan.user_action {
            insert_user_action(&mut *tx, action).await?;
        }
        for entry in plan.log {
            insert_report_log(&mut *tx, entry).await?;
        }
        let reporter_notified = plan.notifications.iter().any(|n| n.user_id == report.reporter_id);
        insert_outbox(&mut *tx, plan.notifications).await?;
        let resolved = sqlx::query_as::<_, ReportRecord>(
            "UPDATE content_reports SET status = $2, resolution = $3, resolved_by = $4, resolution_notes = $5, \
                 reporter_notified = reporter_notified OR $6, updated_at = $7 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(plan.status.as_str())
        .bind(plan.resolution.map(|r| r.as_str()))
        .bind(db_id(plan.resolved_by))
        .bind(&plan.resolution_notes)
        .bind(reporter_notified)
        .bind(plan.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("report {id}")))?
        .to_domain()?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(resolved)
    }

    async fn append_report_log(&self, entry: NewReportLogEntry) -> PortResult<ReportActionLog> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        ensure_report(&mut *conn, entry.report_id).await?;
        insert_report_log(&mut *conn, entry).await
    }

    async fn list_report_log(&self, report_id: u64) -> PortResult<Vec<ReportActionLog>> {
        let rows = sqlx::query_as::<_, ReportLogRecord>(
            "SELECT * FROM report_action_logs WHERE report_id = $1 ORDER BY id",
        )
        .bind(db_id(report_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("log of report {report_id}")))?;
        rows.into_iter().map(ReportLogRecord::to_domain).collect()
    }

    async fn report_stats(&self) -> PortResult<ReportStats> {
        let by_status: HashMap<String, i64> =
            sqlx::query_as::<_, (String, i64)>("SELECT status, count(*) FROM content_reports GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(port_err("report stats"))?
                .into_iter()
                .collect();
        let by_category: HashMap<String, i64> =
            sqlx::query_as::<_, (String, i64)>("SELECT category, count(*) FROM content_reports GROUP BY category")
                .fetch_all(&self.pool)
                .await
                .map_err(port_err("report stats"))?
                .into_iter()
                .collect();
        let count_of = |counts: &HashMap<String, i64>, key: &str| unsigned(counts.get(key).copied().unwrap_or(0));
        Ok(ReportStats {
            total: by_status.values().copied().map(unsigned).sum(),
            by_status: ReportStatus::ALL
                .iter()
                .map(|s| (*s, count_of(&by_status, s.as_str())))
                .filter(|(_, n)| *n > 0)
                .collect(),
            by_category: ReportCategory::ALL
                .iter()
                .map(|c| (*c, count_of(&by_category, c.as_str())))
                .filter(|(_, n)| *n > 0)
                .collect(),
        })
    }
}
