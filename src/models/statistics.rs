use std::collections::BTreeMap;

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::Serialize;

use crate::{
    error::AppError,
    repository::{IncidentFilter, IncidentOrdering, IncidentRepository, PageRequest},
};

use super::{
    choices::{Category, Choice, InjuryDamageType},
    incident::IncidentListItem,
};

pub const RECENT_INCIDENTS: u64 = 10;
pub const TREND_MONTHS: u32 = 12;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_incidents: u64,
    pub incidents_this_month: u64,
    pub incidents_this_week: u64,
    pub active_incidents: u64,
    pub by_category: BTreeMap<&'static str, u64>,
    pub by_injury_type: BTreeMap<&'static str, u64>,
    pub by_facility: BTreeMap<String, u64>,
    pub recent_incidents: Vec<IncidentListItem>,
    pub monthly_trend: Vec<MonthlyTrendEntry>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct MonthlyTrendEntry {
    pub month: String,
    pub year: i32,
    pub count: u64,
    /// First day of the month.
    pub date: NaiveDate,
}

/// An inclusive range of days.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

pub fn month_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.day0()))
}

pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// The calendar month containing `first`, which must be a first day.
fn month_window(first: NaiveDate) -> Option<DateWindow> {
    let next = first.checked_add_months(Months::new(1))?;
    Some(DateWindow {
        first,
        last: next.pred_opt()?,
    })
}

/// `months` whole calendar months ending with the month of `today`, oldest
/// first.
pub fn trailing_months(today: NaiveDate, months: u32) -> Vec<DateWindow> {
    let current = month_start(today);
    (0..months)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .filter_map(month_window)
        .collect()
}

impl DashboardStats {
    /// Aggregates over active incidents as of `today`.
    pub async fn compute(
        repo: &dyn IncidentRepository,
        today: NaiveDate,
    ) -> Result<DashboardStats, AppError> {
        let active = IncidentFilter::active();

        let active_incidents = repo.count(&active).await?;
        let incidents_this_month = repo
            .count(&IncidentFilter {
                occurred_from: Some(month_start(today)),
                ..active.clone()
            })
            .await?;
        let incidents_this_week = repo
            .count(&IncidentFilter {
                occurred_from: Some(week_start(today)),
                ..active.clone()
            })
            .await?;

        let mut by_category = BTreeMap::new();
        for &category in Category::CHOICES {
            let filter = IncidentFilter {
                category: Some(category),
                ..active.clone()
            };
            by_category.insert(category.value(), repo.count(&filter).await?);
        }

        let mut by_injury_type = BTreeMap::new();
        for &injury in InjuryDamageType::CHOICES {
            let filter = IncidentFilter {
                injury_damage_type: Some(injury),
                ..active.clone()
            };
            by_injury_type.insert(injury.value(), repo.count(&filter).await?);
        }

        let by_facility = repo
            .count_by_facility(&active)
            .await?
            .into_iter()
            .collect();

        let recent = repo
            .list(
                &active,
                &IncidentOrdering::default(),
                PageRequest {
                    offset: 0,
                    limit: Some(RECENT_INCIDENTS),
                },
            )
            .await?
            .items;
        let ids: Vec<_> = recent.iter().map(|incident| incident.id).collect();
        let counts = repo.attachment_counts(&ids).await?;
        let recent_incidents = recent
            .iter()
            .map(|incident| {
                let count = counts.get(&incident.id).copied().unwrap_or(0);
                incident.to_list_item(count, today)
            })
            .collect();

        let mut monthly_trend = Vec::with_capacity(TREND_MONTHS as usize);
        for window in trailing_months(today, TREND_MONTHS) {
            let filter = IncidentFilter {
                occurred_from: Some(window.first),
                occurred_to: Some(window.last),
                ..active.clone()
            };
            monthly_trend.push(MonthlyTrendEntry {
                month: window.first.format("%B").to_string(),
                year: window.first.year(),
                count: repo.count(&filter).await?,
                date: window.first,
            });
        }

        Ok(DashboardStats {
            total_incidents: active_incidents,
            incidents_this_month,
            incidents_this_week,
            active_incidents,
            by_category,
            by_injury_type,
            by_facility,
            recent_incidents,
            monthly_trend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::incident::fixtures;
    use crate::repository::memory::MemoryIncidentRepository;
    use chrono::Weekday;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(date(2024, 1, 1))]
    #[case(date(2024, 1, 31))]
    #[case(date(2024, 2, 29))]
    #[case(date(2024, 3, 31))]
    #[case(date(2023, 12, 15))]
    fn trailing_months_are_contiguous_calendar_months(#[case] today: NaiveDate) {
        let windows = trailing_months(today, TREND_MONTHS);

        assert_eq!(windows.len(), 12);
        assert_eq!(windows[11].first, month_start(today));
        assert!(windows[11].last >= today);
        for window in &windows {
            assert_eq!(window.first.day(), 1);
            assert_eq!(window.last.succ_opt().unwrap().day(), 1);
        }
        for pair in windows.windows(2) {
            assert_eq!(pair[0].last.succ_opt().unwrap(), pair[1].first);
        }
    }

    #[test]
    fn trailing_months_cross_year_boundary() {
        let windows = trailing_months(date(2024, 3, 31), TREND_MONTHS);
        assert_eq!(windows[0].first, date(2023, 4, 1));
        assert_eq!(windows[10].last, date(2024, 2, 29));
    }

    #[rstest]
    #[case(date(2024, 6, 10), date(2024, 6, 10))]
    #[case(date(2024, 6, 16), date(2024, 6, 10))]
    #[case(date(2024, 6, 12), date(2024, 6, 10))]
    fn weeks_start_on_monday(#[case] today: NaiveDate, #[case] expected: NaiveDate) {
        assert_eq!(week_start(today), expected);
        assert_eq!(expected.weekday(), Weekday::Mon);
    }

    #[tokio::test]
    async fn stats_count_only_active_incidents() {
        let repo = MemoryIncidentRepository::default();
        let today = date(2024, 6, 12);

        let this_week = fixtures::incident("This week", date(2024, 6, 11));
        let mut this_month = fixtures::incident("This month", date(2024, 6, 3));
        this_month.facility = Some("Plant 2".into());
        this_month.injury_damage_type = InjuryDamageType::MinorInjury;
        let mut last_year = fixtures::incident("Last year", date(2023, 7, 20));
        last_year.facility = None;
        let mut inactive = fixtures::incident("Inactive", date(2024, 6, 11));
        inactive.is_active = false;

        for incident in [&this_week, &this_month, &last_year, &inactive] {
            repo.insert(incident).await.unwrap();
        }

        let stats = DashboardStats::compute(&repo, today).await.unwrap();

        assert_eq!(stats.total_incidents, 3);
        assert_eq!(stats.active_incidents, 3);
        assert_eq!(stats.incidents_this_month, 2);
        assert_eq!(stats.incidents_this_week, 1);

        assert_eq!(stats.by_category.len(), Category::CHOICES.len());
        assert_eq!(stats.by_category["INCIDENT"], 3);
        assert_eq!(stats.by_category["NEAR_MISS"], 0);
        assert_eq!(stats.by_injury_type["NO_INJURY"], 2);
        assert_eq!(stats.by_injury_type["MINOR_INJURY"], 1);
        assert_eq!(stats.by_injury_type["FATALITY"], 0);

        assert_eq!(
            stats.by_facility,
            BTreeMap::from([("Plant 1".to_string(), 1), ("Plant 2".to_string(), 1)])
        );

        assert_eq!(stats.recent_incidents.len(), 3);
        assert!(stats.recent_incidents.iter().all(|item| item.is_active));

        assert_eq!(stats.monthly_trend.len(), 12);
        assert_eq!(
            stats.monthly_trend[0],
            MonthlyTrendEntry {
                month: "July".into(),
                year: 2023,
                count: 1,
                date: date(2023, 7, 1),
            }
        );
        assert_eq!(stats.monthly_trend[11].month, "June");
        assert_eq!(stats.monthly_trend[11].count, 2);
        let total: u64 = stats.monthly_trend.iter().map(|entry| entry.count).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn recent_incidents_are_capped() {
        let repo = MemoryIncidentRepository::default();
        for day in 1..=12 {
            let incident = fixtures::incident(&format!("Incident {day}"), date(2024, 5, day));
            repo.insert(&incident).await.unwrap();
        }

        let stats = DashboardStats::compute(&repo, date(2024, 6, 1)).await.unwrap();
        assert_eq!(stats.recent_incidents.len(), 10);
        assert_eq!(stats.recent_incidents[0].incident_title, "Incident 12");
    }
}
