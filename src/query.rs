use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value;

/// One tagged clause of an attendance query. Every clause names the table it
/// constrains: `a` (attendance), `s` (the joined student row) or `d` (the
/// joined department row). Class, session and tenant constraints live on the
/// student side and are therefore only valid after the join.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Tenant(String),
    Student(String),
    Status(String),
    Class(i64),
    Session(i64),
    Group(String),
    Department(String),
    DateFrom(NaiveDate),
    DateTo(NaiveDate),
    Search(String),
}

impl FilterClause {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterClause::Tenant(_) => "s.organization_id = ?",
            FilterClause::Student(_) => "a.student_id = ?",
            FilterClause::Status(_) => "a.status = ?",
            FilterClause::Class(_) => "s.class = ?",
            FilterClause::Session(_) => "s.session = ?",
            FilterClause::Group(_) => "a.group_name = ?",
            FilterClause::Department(_) => "a.department_id = ?",
            FilterClause::DateFrom(_) => "a.date >= ?",
            FilterClause::DateTo(_) => "a.date <= ?",
            FilterClause::Search(_) => {
                "(LOWER(s.name) LIKE ? OR LOWER(s.email) LIKE ? OR LOWER(s.roll) LIKE ?
                  OR LOWER(d.name) LIKE ? OR LOWER(COALESCE(a.group_name, '')) LIKE ?)"
            }
        }
    }

    pub fn params(&self) -> Vec<Value> {
        match self {
            FilterClause::Tenant(v)
            | FilterClause::Student(v)
            | FilterClause::Status(v)
            | FilterClause::Group(v)
            | FilterClause::Department(v) => vec![Value::Text(v.clone())],
            FilterClause::Class(v) | FilterClause::Session(v) => vec![Value::Integer(*v)],
            FilterClause::DateFrom(d) | FilterClause::DateTo(d) => {
                vec![Value::Text(d.format("%Y-%m-%d").to_string())]
            }
            FilterClause::Search(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                vec![Value::Text(pattern); 5]
            }
        }
    }
}

/// Composes clauses into a WHERE fragment plus its positional parameters.
/// Clause order is fixed by the caller's build order, so the count query and
/// the page query of a faceted list observe an identical match stage.
pub fn where_sql(clauses: &[FilterClause]) -> (String, Vec<Value>) {
    if clauses.is_empty() {
        return (String::new(), Vec::new());
    }
    let frags: Vec<&str> = clauses.iter().map(|c| c.sql()).collect();
    let params: Vec<Value> = clauses.iter().flat_map(|c| c.params()).collect();
    (format!("WHERE {}", frags.join(" AND ")), params)
}

/// Parsed attendance list filter. `None` on class/session means "all".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceFilter {
    pub search: Option<String>,
    pub status: Option<String>,
    pub class: Option<i64>,
    pub session: Option<i64>,
    pub group: Option<String>,
    pub department_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

fn parse_date_field(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, String> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(format!("{} must be a YYYY-MM-DD string", key));
    };
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| format!("{} must be a YYYY-MM-DD string", key))
}

/// Integer-or-"all" fields. The literal "all" (or absence) means no
/// constraint; anything else must parse as an integer.
pub fn parse_int_or_all(params: &serde_json::Value, key: &str) -> Result<Option<i64>, String> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    if let Some(n) = v.as_i64() {
        return Ok(Some(n));
    }
    if let Some(s) = v.as_str() {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("all") {
            return Ok(None);
        }
        if let Ok(n) = t.parse::<i64>() {
            return Ok(Some(n));
        }
    }
    Err(format!("{} must be an integer or \"all\"", key))
}

fn parse_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_attendance_filter(params: &serde_json::Value) -> Result<AttendanceFilter, String> {
    let status = parse_opt_str(params, "status");
    if let Some(st) = &status {
        if !crate::calc::is_attendance_status(st) {
            return Err("status must be one of: present, absent, late, leave".to_string());
        }
    }

    let month = match params.get("month") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let m = v
                .as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
                .ok_or_else(|| "month must be an integer between 1 and 12".to_string())?;
            if !(1..=12).contains(&m) {
                return Err("month must be an integer between 1 and 12".to_string());
            }
            Some(m as u32)
        }
    };
    let year = match params.get("year") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let y = v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
                .ok_or_else(|| "year must be an integer".to_string())?;
            let y = i32::try_from(y).map_err(|_| "year is out of range".to_string())?;
            Some(y)
        }
    };

    Ok(AttendanceFilter {
        search: parse_opt_str(params, "search"),
        status,
        class: parse_int_or_all(params, "class")?,
        session: parse_int_or_all(params, "session")?,
        group: parse_opt_str(params, "group"),
        department_id: parse_opt_str(params, "departmentId"),
        start_date: parse_date_field(params, "startDate")?,
        end_date: parse_date_field(params, "endDate")?,
        month,
        year,
    })
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Expands a parsed filter into ordered clauses, tenant first. The explicit
/// date range and the month/year window are layered as separate clause pairs,
/// so when both are present the narrower intersection applies.
pub fn build_attendance_clauses(
    organization: &str,
    filter: &AttendanceFilter,
    today: NaiveDate,
) -> Result<Vec<FilterClause>, String> {
    let mut clauses = vec![FilterClause::Tenant(organization.to_string())];

    if let Some(term) = &filter.search {
        clauses.push(FilterClause::Search(term.clone()));
    }
    if let Some(status) = &filter.status {
        clauses.push(FilterClause::Status(status.clone()));
    }
    if let Some(class) = filter.class {
        clauses.push(FilterClause::Class(class));
    }
    if let Some(session) = filter.session {
        clauses.push(FilterClause::Session(session));
    }
    if let Some(group) = &filter.group {
        clauses.push(FilterClause::Group(group.clone()));
    }
    if let Some(dep) = &filter.department_id {
        clauses.push(FilterClause::Department(dep.clone()));
    }
    if let Some(from) = filter.start_date {
        clauses.push(FilterClause::DateFrom(from));
    }
    if let Some(to) = filter.end_date {
        clauses.push(FilterClause::DateTo(to));
    }

    match (filter.month, filter.year) {
        (Some(month), year) => {
            let year = year.unwrap_or_else(|| today.year());
            let (from, to) =
                month_bounds(year, month).ok_or_else(|| "invalid month/year".to_string())?;
            clauses.push(FilterClause::DateFrom(from));
            clauses.push(FilterClause::DateTo(to));
        }
        (None, Some(year)) => {
            let (from, to) = year_bounds(year).ok_or_else(|| "invalid year".to_string())?;
            clauses.push(FilterClause::DateFrom(from));
            clauses.push(FilterClause::DateTo(to));
        }
        (None, None) => {}
    }

    Ok(clauses)
}

pub fn parse_page(v: Option<&serde_json::Value>) -> Result<usize, String> {
    let Some(value) = v else {
        return Ok(1);
    };
    if value.is_null() {
        return Ok(1);
    }
    let Some(page) = value.as_u64() else {
        return Err("page must be a positive integer".to_string());
    };
    if page == 0 {
        return Err("page must be >= 1".to_string());
    }
    Ok(page as usize)
}

pub fn parse_limit(v: Option<&serde_json::Value>) -> Result<usize, String> {
    let Some(value) = v else {
        return Ok(10);
    };
    if value.is_null() {
        return Ok(10);
    }
    let Some(limit) = value.as_i64() else {
        return Err("limit must be a positive integer".to_string());
    };
    if limit <= 0 || limit > 500 {
        return Err("limit must be in range 1..=500".to_string());
    }
    Ok(limit as usize)
}

/// ceil(total/limit), 0 when the set is empty. `limit` is validated > 0
/// upstream, so the division is safe.
pub fn total_pages(total: usize, limit: usize) -> usize {
    if total == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}
