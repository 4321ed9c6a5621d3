use std::collections::BTreeSet;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::models::{Course, CoursePolicy, Enrollment, ReEnrollUnit};
use crate::store::{CourseCatalog, EnrollmentStore, StoreError};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn at(year: i32, month: u32, day: u32) -> anyhow::Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 9, 0, 0)
        .single()
        .context("invalid timestamp")
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let courses = vec![
        (
            "course-v1:GS+SAFE101+2026",
            "Lab Safety Essentials",
            None,
            Some(30),
            vec![10, 20, 30],
            false,
            0,
            Some(12),
            "month",
        ),
        (
            "course-v1:GS+ETH201+2026",
            "Research Ethics",
            Some(at(2027, 6, 30)?),
            Some(45),
            vec![],
            true,
            7,
            Some(2),
            "year",
        ),
        (
            "course-v1:GS+ORIENT+2025",
            "Scholar Orientation",
            Some(at(2025, 12, 31)?),
            Some(14),
            vec![7, 14],
            false,
            0,
            None,
            "month",
        ),
    ];

    for (
        id,
        display_name,
        end_at,
        finish_days,
        reminder_days,
        periodic,
        periodic_days,
        re_enroll_interval,
        re_enroll_unit,
    ) in courses
    {
        sqlx::query(
            r#"
            INSERT INTO enrollment_lifecycle.courses
            (id, display_name, end_at, finish_days, reminder_days,
             periodic_reminder_enabled, periodic_reminder_interval_days,
             re_enroll_interval, re_enroll_unit)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                end_at = EXCLUDED.end_at,
                finish_days = EXCLUDED.finish_days,
                reminder_days = EXCLUDED.reminder_days,
                periodic_reminder_enabled = EXCLUDED.periodic_reminder_enabled,
                periodic_reminder_interval_days = EXCLUDED.periodic_reminder_interval_days,
                re_enroll_interval = EXCLUDED.re_enroll_interval,
                re_enroll_unit = EXCLUDED.re_enroll_unit
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(end_at)
        .bind(finish_days)
        .bind(reminder_days)
        .bind(periodic)
        .bind(periodic_days)
        .bind(re_enroll_interval)
        .bind(re_enroll_unit)
        .execute(pool)
        .await?;
    }

    let learners = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@groupscholar.com",
            Some("en"),
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@groupscholar.com",
            Some("es-MX"),
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@groupscholar.com",
            None,
        ),
    ];

    for (id, name, email, language) in learners {
        sqlx::query(
            r#"
            INSERT INTO enrollment_lifecycle.learners (id, full_name, email, language)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, language = EXCLUDED.language
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(language)
        .execute(pool)
        .await?;
    }

    let enrollments = vec![
        (
            "avery.lee@groupscholar.com",
            "course-v1:GS+SAFE101+2026",
            at(2025, 6, 2)?,
            Some(at(2025, 6, 20)?),
        ),
        (
            "jules.moreno@groupscholar.com",
            "course-v1:GS+SAFE101+2026",
            at(2026, 9, 29)?,
            None,
        ),
        (
            "kiara.patel@groupscholar.com",
            "course-v1:GS+ETH201+2026",
            at(2026, 8, 17)?,
            None,
        ),
    ];

    for (email, course_id, created_at, completed_at) in enrollments {
        let learner_id: Uuid =
            sqlx::query("SELECT id FROM enrollment_lifecycle.learners WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .try_get("id")?;

        sqlx::query(
            r#"
            INSERT INTO enrollment_lifecycle.enrollments
            (id, learner_id, course_id, is_active, created_at, completed_at)
            VALUES ($1, $2, $3, TRUE, $4, $5)
            ON CONFLICT (learner_id, course_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(learner_id)
        .bind(course_id)
        .bind(created_at)
        .bind(completed_at)
        .execute(pool)
        .await?;

        for problem in ["q1", "q2", "final"] {
            sqlx::query(
                r#"
                INSERT INTO enrollment_lifecycle.problem_progress
                (id, learner_id, course_id, problem_key, grade, max_grade, modified_at)
                VALUES ($1, $2, $3, $4, 1.0, 1.0, $5)
                ON CONFLICT (learner_id, course_id, problem_key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(learner_id)
            .bind(course_id)
            .bind(format!("{course_id}/problem/{problem}"))
            .bind(completed_at.unwrap_or(created_at))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        language: Option<String>,
        course_id: String,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        if row.completed_at.is_some_and(|done| done < row.created_at) {
            anyhow::bail!(
                "row {}: {} completed {} before enrolling",
                line + 1,
                row.email,
                row.course_id
            );
        }

        let learner_id: Uuid = sqlx::query(
            r#"
            INSERT INTO enrollment_lifecycle.learners (id, full_name, email, language)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                language = COALESCE(EXCLUDED.language, enrollment_lifecycle.learners.language)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.email)
        .bind(row.language.as_deref().filter(|l| !l.is_empty()))
        .fetch_one(pool)
        .await?
        .try_get("id")?;

        let result = sqlx::query(
            r#"
            INSERT INTO enrollment_lifecycle.enrollments
            (id, learner_id, course_id, is_active, created_at, completed_at)
            VALUES ($1, $2, $3, TRUE, $4, $5)
            ON CONFLICT (learner_id, course_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(learner_id)
        .bind(&row.course_id)
        .bind(row.created_at)
        .bind(row.completed_at)
        .execute(pool)
        .await
        .with_context(|| format!("row {}: could not enroll in {}", line + 1, row.course_id))?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Postgres-backed course catalog and enrollment store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn course_from_row(row: &PgRow) -> Result<Course, StoreError> {
    let id: String = row.try_get("id")?;
    let invalid = |reason: String| StoreError::InvalidPolicy {
        course_id: id.clone(),
        reason,
    };

    let unit: String = row.try_get("re_enroll_unit")?;
    let reminder_days: Vec<i32> = row.try_get("reminder_days")?;
    let policy = CoursePolicy {
        finish_days: row.try_get::<Option<i32>, _>("finish_days")?.map(i64::from),
        reminder_days: reminder_days.into_iter().map(i64::from).collect::<BTreeSet<_>>(),
        periodic_reminder_enabled: row.try_get("periodic_reminder_enabled")?,
        periodic_reminder_interval_days: i64::from(
            row.try_get::<i32, _>("periodic_reminder_interval_days")?,
        ),
        re_enroll_interval: row
            .try_get::<Option<i32>, _>("re_enroll_interval")?
            .map(i64::from),
        re_enroll_unit: unit.parse::<ReEnrollUnit>().map_err(invalid)?,
    };
    policy.validate().map_err(invalid)?;

    Ok(Course {
        display_name: row.try_get("display_name")?,
        end: row.try_get("end_at")?,
        policy,
        id,
    })
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment, sqlx::Error> {
    Ok(Enrollment {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        learner_name: row.try_get("full_name")?,
        learner_email: row.try_get("email")?,
        language: row.try_get("language")?,
        course_id: row.try_get("course_id")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait::async_trait]
impl CourseCatalog for PgStore {
    async fn course_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM enrollment_lifecycle.courses ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.try_get("id")?);
        }
        Ok(ids)
    }

    async fn course(&self, course_id: &str) -> Result<Course, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, end_at, finish_days, reminder_days,
                   periodic_reminder_enabled, periodic_reminder_interval_days,
                   re_enroll_interval, re_enroll_unit
            FROM enrollment_lifecycle.courses
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::CourseNotFound(course_id.to_string()))?;

        course_from_row(&row)
    }
}

#[async_trait::async_trait]
impl EnrollmentStore for PgStore {
    async fn active_enrollments(
        &self,
        course_ids: &[String],
        completed: bool,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.learner_id, l.full_name, l.email, l.language,
                   e.course_id, e.is_active, e.created_at, e.completed_at
            FROM enrollment_lifecycle.enrollments e
            JOIN enrollment_lifecycle.learners l ON l.id = e.learner_id
            WHERE e.is_active
              AND e.course_id = ANY($1)
              AND (e.completed_at IS NOT NULL) = $2
            ORDER BY e.created_at
            "#,
        )
        .bind(course_ids)
        .bind(completed)
        .fetch_all(&self.pool)
        .await?;

        let mut enrollments = Vec::with_capacity(rows.len());
        for row in &rows {
            enrollments.push(enrollment_from_row(row)?);
        }
        Ok(enrollments)
    }

    async fn re_enroll(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Only an active, still-completed row may be reset; a concurrent or
        // stale pass that already restarted it matches nothing here.
        let Some(row) = sqlx::query(
            r#"
            UPDATE enrollment_lifecycle.enrollments
            SET created_at = $2, completed_at = NULL
            WHERE id = $1 AND is_active AND completed_at IS NOT NULL
            RETURNING learner_id, course_id
            "#,
        )
        .bind(enrollment_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let learner_id: Uuid = row.try_get("learner_id")?;
        let course_id: String = row.try_get("course_id")?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM enrollment_lifecycle.problem_progress
            WHERE learner_id = $1 AND course_id = $2
            "#,
        )
        .bind(learner_id)
        .bind(&course_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(Some(deleted))
    }
}
