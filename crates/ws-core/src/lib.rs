//! Core domain entities, rules, and traits for the workshop records.

use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use thiserror::Error;
use ws_utils::{capitalize, normalize_key, title_case};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by entity validation, business rules, and repositories.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// A field does not match its expected shape.
    #[error("invalid {field} format: {value:?}")]
    InvalidFormat {
        /// Offending field.
        field: &'static str,
        /// Normalized value that was rejected.
        value: String,
    },
    /// A required text field is blank.
    #[error("{field} cannot be empty")]
    Empty {
        /// Offending field.
        field: &'static str,
    },
    /// A numeric or length constraint is violated.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Rejected value, rendered for display.
        value: String,
    },
    /// A date that must not lie in the future does.
    #[error("{field} cannot be in the future: {value}")]
    FutureDate {
        /// Offending field.
        field: &'static str,
        /// Rejected date.
        value: NaiveDate,
    },
    /// Appointment cost below zero.
    #[error("cost cannot be negative: {0}")]
    NegativeCost(f64),
    /// Registration of a key that is already stored.
    #[error("a {entity} with key {key} already exists")]
    Duplicate {
        /// Entity kind, such as "customer".
        entity: &'static str,
        /// Conflicting key.
        key: String,
    },
    /// A key that had to exist is not stored.
    #[error("no {entity} found with key {key}")]
    NotFound {
        /// Entity kind, such as "car".
        entity: &'static str,
        /// Missing key.
        key: String,
    },
    /// Scheduling or moving an appointment before the current instant.
    #[error("appointment cannot be in the past: {0}")]
    PastAppointment(NaiveDateTime),
    /// Returned when repository operations fail.
    #[error("storage error: {0}")]
    Storage(String),
}

static DNI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}[A-Z]$").expect("dni pattern compiles"));
static PLATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}[A-Z]{3}$").expect("plate pattern compiles"));
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("email pattern compiles"));

/// Oldest accepted car model year.
pub const MIN_CAR_YEAR: i32 = 1900;

/// Days after the last revision at which a car is due again.
pub const REVISION_INTERVAL_DAYS: i64 = 365;

const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;

/// Source of the current local date and time.
pub trait Clock {
    /// The current local instant.
    fn now(&self) -> NaiveDateTime;

    /// The current local date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Clock backed by the machine's local time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to a single instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

fn require_text(field: &'static str, value: &str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::Empty { field });
    }
    Ok(())
}

fn require_pattern(field: &'static str, pattern: &Regex, value: &str) -> CoreResult<()> {
    if !pattern.is_match(value) {
        return Err(CoreError::InvalidFormat {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// A registered workshop customer, keyed by DNI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Customer {
    dni: String,
    name: String,
    surname: String,
    birth_date: NaiveDate,
    email: String,
    phone: String,
}

impl Customer {
    /// Normalize and validate every field.
    pub fn new(
        dni: impl AsRef<str>,
        name: impl AsRef<str>,
        surname: impl AsRef<str>,
        birth_date: NaiveDate,
        email: impl AsRef<str>,
        phone: impl AsRef<str>,
    ) -> CoreResult<Self> {
        let dni = normalize_key(dni.as_ref());
        let name = capitalize(name.as_ref().trim());
        let surname = title_case(surname.as_ref().trim());
        let email = email.as_ref().trim().to_lowercase();
        let phone = phone.as_ref().trim().to_string();

        require_pattern("dni", &DNI_PATTERN, &dni)?;
        require_text("name", &name)?;
        require_text("surname", &surname)?;
        require_pattern("email", &EMAIL_PATTERN, &email)?;
        if !phone.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(CoreError::InvalidFormat {
                field: "phone",
                value: phone,
            });
        }
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&phone.len()) {
            return Err(CoreError::OutOfRange {
                field: "phone",
                value: format!("{} digits", phone.len()),
            });
        }
        if birth_date > SystemClock.today() {
            return Err(CoreError::FutureDate {
                field: "birth_date",
                value: birth_date,
            });
        }

        Ok(Self {
            dni,
            name,
            surname,
            birth_date,
            email,
            phone,
        })
    }

    /// National id, the unique key.
    pub fn dni(&self) -> &str {
        &self.dni
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surname(&self) -> &str {
        &self.surname
    }

    /// Name and surname joined by a space.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }

    pub fn birth_date(&self) -> NaiveDate {
        self.birth_date
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Age in whole years as of `today`.
    pub fn age_on(&self, today: NaiveDate) -> i32 {
        let mut years = today.year() - self.birth_date.year();
        if (today.month(), today.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        years
    }

    /// Age in whole years as of the local date.
    pub fn age(&self) -> i32 {
        self.age_on(SystemClock.today())
    }
}

/// A car registered in the workshop, keyed by plate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Car {
    plate: String,
    brand: String,
    model: String,
    year: i32,
    last_revision: Option<NaiveDate>,
}

impl Car {
    /// Normalize and validate every field.
    pub fn new(
        plate: impl AsRef<str>,
        brand: impl AsRef<str>,
        model: impl AsRef<str>,
        year: i32,
        last_revision: Option<NaiveDate>,
    ) -> CoreResult<Self> {
        let plate = normalize_key(plate.as_ref());
        let brand = brand.as_ref().trim().to_string();
        let model = model.as_ref().trim().to_string();

        require_pattern("plate", &PLATE_PATTERN, &plate)?;
        require_text("brand", &brand)?;
        require_text("model", &model)?;
        let current_year = SystemClock.today().year();
        if !(MIN_CAR_YEAR..=current_year).contains(&year) {
            return Err(CoreError::OutOfRange {
                field: "year",
                value: year.to_string(),
            });
        }

        Ok(Self {
            plate,
            brand,
            model,
            year,
            last_revision,
        })
    }

    /// Registration plate, the unique key.
    pub fn plate(&self) -> &str {
        &self.plate
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn last_revision(&self) -> Option<NaiveDate> {
        self.last_revision
    }

    /// Whether a revision is due as of `today`.
    pub fn needs_revision_on(&self, today: NaiveDate) -> bool {
        match self.last_revision {
            None => true,
            Some(last) => (today - last).num_days() >= REVISION_INTERVAL_DAYS,
        }
    }

    /// Whether a revision is due as of the local date.
    pub fn needs_revision(&self) -> bool {
        self.needs_revision_on(SystemClock.today())
    }
}

/// A foreign key that was either resolved to its current record or left
/// dangling because the record no longer exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference<T> {
    /// The referenced record as currently stored.
    Resolved(T),
    /// Nothing is stored under `key` any more.
    Unresolved {
        /// The dangling key.
        key: String,
    },
}

impl<T> Reference<T> {
    /// Build a dangling reference, normalizing the key.
    pub fn unresolved(key: impl AsRef<str>) -> Self {
        Self::Unresolved {
            key: normalize_key(key.as_ref()),
        }
    }

    /// The resolved record, if any.
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl<T> From<T> for Reference<T> {
    fn from(value: T) -> Self {
        Self::Resolved(value)
    }
}

impl Reference<Customer> {
    /// DNI of the referenced customer, resolved or not.
    pub fn dni(&self) -> &str {
        match self {
            Self::Resolved(customer) => customer.dni(),
            Self::Unresolved { key } => key,
        }
    }
}

impl Reference<Car> {
    /// Plate of the referenced car, resolved or not.
    pub fn plate(&self) -> &str {
        match self {
            Self::Resolved(car) => car.plate(),
            Self::Unresolved { key } => key,
        }
    }
}

/// Natural key of an appointment: the car plus the slot it is booked in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppointmentKey {
    /// Plate of the booked car.
    pub plate: String,
    /// Day of the appointment.
    pub date: NaiveDate,
    /// Start time, whole seconds.
    pub time: NaiveTime,
}

impl AppointmentKey {
    /// Build a key, normalizing the plate and dropping sub-second precision.
    pub fn new(plate: impl AsRef<str>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            plate: normalize_key(plate.as_ref()),
            date,
            time: whole_seconds(time),
        }
    }
}

impl fmt::Display for AppointmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} at {}", self.plate, self.date, self.time)
    }
}

fn whole_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// A booked workshop slot for a customer's car.
#[derive(Clone, Debug, PartialEq)]
pub struct Appointment {
    customer: Reference<Customer>,
    car: Reference<Car>,
    date: NaiveDate,
    time: NaiveTime,
    cost: f64,
}

impl Appointment {
    /// Validate the cost and assemble the appointment.
    ///
    /// Whether the slot lies in the past is a scheduling rule checked by the
    /// services, so stored appointments that have since passed still load.
    pub fn new(
        customer: impl Into<Reference<Customer>>,
        car: impl Into<Reference<Car>>,
        date: NaiveDate,
        time: NaiveTime,
        cost: f64,
    ) -> CoreResult<Self> {
        if !cost.is_finite() {
            return Err(CoreError::OutOfRange {
                field: "cost",
                value: cost.to_string(),
            });
        }
        if cost < 0.0 {
            return Err(CoreError::NegativeCost(cost));
        }
        Ok(Self {
            customer: customer.into(),
            car: car.into(),
            date,
            time: whole_seconds(time),
            cost,
        })
    }

    pub fn customer(&self) -> &Reference<Customer> {
        &self.customer
    }

    pub fn car(&self) -> &Reference<Car> {
        &self.car
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// The (plate, date, time) key used to update or delete this appointment.
    pub fn key(&self) -> AppointmentKey {
        AppointmentKey {
            plate: self.car.plate().to_string(),
            date: self.date,
            time: self.time,
        }
    }

    /// Date and time combined.
    pub fn starts_at(&self) -> NaiveDateTime {
        NaiveDateTime::new(self.date, self.time)
    }

    pub fn is_past_at(&self, now: NaiveDateTime) -> bool {
        self.starts_at() < now
    }

    pub fn is_past(&self) -> bool {
        self.is_past_at(SystemClock.now())
    }

    pub fn involves_car(&self, plate: &str) -> bool {
        self.car.plate() == normalize_key(plate)
    }

    pub fn involves_customer(&self, dni: &str) -> bool {
        self.customer.dni() == normalize_key(dni)
    }
}

/// Repository abstraction for customers.
pub trait CustomerRepository {
    /// Persist a new customer. Duplicate detection is left to callers.
    fn add(&self, customer: &Customer) -> CoreResult<()>;
    /// Fetch a customer by exact DNI.
    fn get_by_dni(&self, dni: &str) -> CoreResult<Option<Customer>>;
    /// Fetch every stored customer.
    fn list_all(&self) -> CoreResult<Vec<Customer>>;
    /// Replace the customer with the same DNI. Returns `false` if none is stored.
    fn update(&self, customer: &Customer) -> CoreResult<bool>;
    /// Remove a customer by DNI. Returns `false` if none is stored.
    fn delete(&self, dni: &str) -> CoreResult<bool>;
}

/// Repository abstraction for cars.
pub trait CarRepository {
    /// Persist a new car. Duplicate detection is left to callers.
    fn add(&self, car: &Car) -> CoreResult<()>;
    /// Fetch a car by exact plate.
    fn get_by_plate(&self, plate: &str) -> CoreResult<Option<Car>>;
    /// Fetch every stored car.
    fn list_all(&self) -> CoreResult<Vec<Car>>;
    /// Replace the car with the same plate. Returns `false` if none is stored.
    fn update(&self, car: &Car) -> CoreResult<bool>;
    /// Remove a car by plate. Returns `false` if none is stored.
    fn delete(&self, plate: &str) -> CoreResult<bool>;
}

/// Repository abstraction for appointments.
pub trait AppointmentRepository {
    /// Persist a new appointment.
    fn add(&self, appointment: &Appointment) -> CoreResult<()>;
    /// Fetch every stored appointment.
    fn list_all(&self) -> CoreResult<Vec<Appointment>>;
    /// Appointments booked on `date`.
    fn find_by_date(&self, date: NaiveDate) -> CoreResult<Vec<Appointment>>;
    /// Appointments of the customer with this exact DNI.
    fn find_by_customer(&self, dni: &str) -> CoreResult<Vec<Appointment>>;
    /// Appointments of the car with this exact plate.
    fn find_by_car(&self, plate: &str) -> CoreResult<Vec<Appointment>>;
    /// Replace the appointment sharing `appointment.key()`. Returns `false` if none matches.
    fn update(&self, appointment: &Appointment) -> CoreResult<bool>;
    /// Remove the appointment with this key. Returns `false` if none matches.
    fn delete(&self, key: &AppointmentKey) -> CoreResult<bool>;
}

impl<R: CustomerRepository + ?Sized> CustomerRepository for &R {
    fn add(&self, customer: &Customer) -> CoreResult<()> {
        (**self).add(customer)
    }

    fn get_by_dni(&self, dni: &str) -> CoreResult<Option<Customer>> {
        (**self).get_by_dni(dni)
    }

    fn list_all(&self) -> CoreResult<Vec<Customer>> {
        (**self).list_all()
    }

    fn update(&self, customer: &Customer) -> CoreResult<bool> {
        (**self).update(customer)
    }

    fn delete(&self, dni: &str) -> CoreResult<bool> {
        (**self).delete(dni)
    }
}

impl<R: CarRepository + ?Sized> CarRepository for &R {
    fn add(&self, car: &Car) -> CoreResult<()> {
        (**self).add(car)
    }

    fn get_by_plate(&self, plate: &str) -> CoreResult<Option<Car>> {
        (**self).get_by_plate(plate)
    }

    fn list_all(&self) -> CoreResult<Vec<Car>> {
        (**self).list_all()
    }

    fn update(&self, car: &Car) -> CoreResult<bool> {
        (**self).update(car)
    }

    fn delete(&self, plate: &str) -> CoreResult<bool> {
        (**self).delete(plate)
    }
}

impl<R: AppointmentRepository + ?Sized> AppointmentRepository for &R {
    fn add(&self, appointment: &Appointment) -> CoreResult<()> {
        (**self).add(appointment)
    }

    fn list_all(&self) -> CoreResult<Vec<Appointment>> {
        (**self).list_all()
    }

    fn find_by_date(&self, date: NaiveDate) -> CoreResult<Vec<Appointment>> {
        (**self).find_by_date(date)
    }

    fn find_by_customer(&self, dni: &str) -> CoreResult<Vec<Appointment>> {
        (**self).find_by_customer(dni)
    }

    fn find_by_car(&self, plate: &str) -> CoreResult<Vec<Appointment>> {
        (**self).find_by_car(plate)
    }

    fn update(&self, appointment: &Appointment) -> CoreResult<bool> {
        (**self).update(appointment)
    }

    fn delete(&self, key: &AppointmentKey) -> CoreResult<bool> {
        (**self).delete(key)
    }
}
