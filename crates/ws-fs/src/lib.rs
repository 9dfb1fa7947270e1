//! JSON-file persistence and configuration for the workshop records.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use ws_core::{
    Appointment, AppointmentKey, AppointmentRepository, Car, CarRepository, CoreError, CoreResult,
    Customer, CustomerRepository, Reference,
};

/// Directory name used for config and default data locations.
pub const APP_DIR_NAME: &str = "workshop";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WORKSHOP_DATA_DIR";

/// File name of the customer store.
pub const CUSTOMERS_FILE_NAME: &str = "customers.json";
/// File name of the car store.
pub const CARS_FILE_NAME: &str = "cars.json";
/// File name of the appointment store.
pub const APPOINTMENTS_FILE_NAME: &str = "appointments.json";

const CONFIG_FILE_NAME: &str = "config.yaml";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Locations of the three store files inside a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFiles {
    /// Customer store.
    pub customers: PathBuf,
    /// Car store.
    pub cars: PathBuf,
    /// Appointment store.
    pub appointments: PathBuf,
}

impl DataFiles {
    /// Derive the store paths from a data directory.
    pub fn new(root: &Path) -> Self {
        Self {
            customers: root.join(CUSTOMERS_FILE_NAME),
            cars: root.join(CARS_FILE_NAME),
            appointments: root.join(APPOINTMENTS_FILE_NAME),
        }
    }
}

/// One element of a store array.
///
/// Elements that do not match the record shape are kept verbatim so that a
/// rewrite of the file never drops them.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Stored<R> {
    Record(R),
    Unreadable(Value),
}

impl<R> Stored<R> {
    fn record(&self) -> Option<&R> {
        match self {
            Self::Record(record) => Some(record),
            Self::Unreadable(_) => None,
        }
    }

    fn into_record(self) -> Option<R> {
        match self {
            Self::Record(record) => Some(record),
            Self::Unreadable(_) => None,
        }
    }
}

/// A file holding one JSON array of flat records.
///
/// Every mutation rewrites the whole array. There is no locking, so only one
/// process may use a store at a time.
#[derive(Debug, Clone)]
struct JsonFile<R> {
    path: PathBuf,
    record: PhantomData<R>,
}

impl<R: Serialize + DeserializeOwned> JsonFile<R> {
    fn open(path: PathBuf) -> CoreResult<Self> {
        let file = Self {
            path,
            record: PhantomData,
        };
        file.ensure_exists()?;
        Ok(file)
    }

    fn ensure_exists(&self) -> CoreResult<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
        }
        self.write(&[])
    }

    /// Missing files and content that is not a JSON array read as empty.
    fn read(&self) -> CoreResult<Vec<Stored<R>>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CoreError::Storage(err.to_string())),
        };
        let elements: Vec<Value> = match serde_json::from_str(&contents) {
            Ok(elements) => elements,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "store is not a JSON array, reading as empty"
                );
                return Ok(Vec::new());
            }
        };
        let entries = elements
            .into_iter()
            .map(|element| match R::deserialize(&element) {
                Ok(record) => Stored::Record(record),
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "keeping unreadable stored element as is"
                    );
                    Stored::Unreadable(element)
                }
            })
            .collect();
        Ok(entries)
    }

    /// Every element that has the record shape.
    fn records(&self) -> CoreResult<Vec<R>> {
        Ok(self
            .read()?
            .into_iter()
            .filter_map(Stored::into_record)
            .collect())
    }

    fn append(&self, record: R) -> CoreResult<()> {
        let mut entries = self.read()?;
        entries.push(Stored::Record(record));
        self.write(&entries)
    }

    /// Replace the first record matching `target`; false when none does.
    fn replace(&self, target: impl Fn(&R) -> bool, record: R) -> CoreResult<bool> {
        let mut entries = self.read()?;
        let Some(slot) = entries
            .iter_mut()
            .find(|entry| entry.record().is_some_and(&target))
        else {
            return Ok(false);
        };
        *slot = Stored::Record(record);
        self.write(&entries)?;
        Ok(true)
    }

    /// Drop every record matching `target`, writing only when one was found.
    fn remove(&self, target: impl Fn(&R) -> bool) -> CoreResult<bool> {
        let mut entries = self.read()?;
        let before = entries.len();
        entries.retain(|entry| !entry.record().is_some_and(&target));
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    fn write(&self, entries: &[Stored<R>]) -> CoreResult<()> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        entries
            .serialize(&mut serializer)
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        fs::write(&self.path, buffer).map_err(|err| CoreError::Storage(err.to_string()))?;
        debug!(path = %self.path.display(), entries = entries.len(), "store written");
        Ok(())
    }
}

fn parse_date(field: &'static str, value: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| CoreError::InvalidFormat {
        field,
        value: value.to_string(),
    })
}

fn parse_time(field: &'static str, value: &str) -> CoreResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(|time| time.with_nanosecond(0).unwrap_or(time))
        .map_err(|_| CoreError::InvalidFormat {
            field,
            value: value.to_string(),
        })
}

/// Hydrate every record, skipping the ones that no longer validate.
fn hydrate_all<R, T>(
    records: Vec<R>,
    path: &Path,
    mut hydrate: impl FnMut(R) -> CoreResult<T>,
) -> Vec<T> {
    let mut entities = Vec::with_capacity(records.len());
    for record in records {
        match hydrate(record) {
            Ok(entity) => entities.push(entity),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping invalid stored record");
            }
        }
    }
    entities
}

fn invalid_stored(entity: &str, key: &str, err: &CoreError) -> CoreError {
    CoreError::Storage(format!("stored {entity} {key} is invalid: {err}"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct CustomerRecord {
    dni: String,
    name: String,
    surname: String,
    birth_date: String,
    email: String,
    phone: String,
}

impl From<&Customer> for CustomerRecord {
    fn from(customer: &Customer) -> Self {
        Self {
            dni: customer.dni().to_string(),
            name: customer.name().to_string(),
            surname: customer.surname().to_string(),
            birth_date: customer.birth_date().format(DATE_FORMAT).to_string(),
            email: customer.email().to_string(),
            phone: customer.phone().to_string(),
        }
    }
}

impl CustomerRecord {
    fn into_customer(self) -> CoreResult<Customer> {
        let birth_date = parse_date("birth_date", &self.birth_date)?;
        Customer::new(
            self.dni,
            self.name,
            self.surname,
            birth_date,
            self.email,
            self.phone,
        )
    }
}

/// Customer store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonCustomerRepository {
    file: JsonFile<CustomerRecord>,
}

impl JsonCustomerRepository {
    /// Open the store, creating an empty one if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        Ok(Self {
            file: JsonFile::open(path.into())?,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl CustomerRepository for JsonCustomerRepository {
    fn add(&self, customer: &Customer) -> CoreResult<()> {
        self.file.append(CustomerRecord::from(customer))
    }

    fn get_by_dni(&self, dni: &str) -> CoreResult<Option<Customer>> {
        let records = self.file.records()?;
        let Some(record) = records.into_iter().find(|record| record.dni == dni) else {
            return Ok(None);
        };
        let customer = record
            .into_customer()
            .map_err(|err| invalid_stored("customer", dni, &err))?;
        Ok(Some(customer))
    }

    fn list_all(&self) -> CoreResult<Vec<Customer>> {
        let records = self.file.records()?;
        Ok(hydrate_all(records, self.path(), CustomerRecord::into_customer))
    }

    fn update(&self, customer: &Customer) -> CoreResult<bool> {
        self.file.replace(
            |record| record.dni == customer.dni(),
            CustomerRecord::from(customer),
        )
    }

    fn delete(&self, dni: &str) -> CoreResult<bool> {
        self.file.remove(|record| record.dni == dni)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct CarRecord {
    plate: String,
    brand: String,
    model: String,
    year: i32,
    last_revision: Option<String>,
}

impl From<&Car> for CarRecord {
    fn from(car: &Car) -> Self {
        Self {
            plate: car.plate().to_string(),
            brand: car.brand().to_string(),
            model: car.model().to_string(),
            year: car.year(),
            last_revision: car
                .last_revision()
                .map(|date| date.format(DATE_FORMAT).to_string()),
        }
    }
}

impl CarRecord {
    fn into_car(self) -> CoreResult<Car> {
        let last_revision = self
            .last_revision
            .as_deref()
            .map(|value| parse_date("last_revision", value))
            .transpose()?;
        Car::new(self.plate, self.brand, self.model, self.year, last_revision)
    }
}

/// Car store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonCarRepository {
    file: JsonFile<CarRecord>,
}

impl JsonCarRepository {
    /// Open the store, creating an empty one if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        Ok(Self {
            file: JsonFile::open(path.into())?,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl CarRepository for JsonCarRepository {
    fn add(&self, car: &Car) -> CoreResult<()> {
        self.file.append(CarRecord::from(car))
    }

    fn get_by_plate(&self, plate: &str) -> CoreResult<Option<Car>> {
        let records = self.file.records()?;
        let Some(record) = records.into_iter().find(|record| record.plate == plate) else {
            return Ok(None);
        };
        let car = record
            .into_car()
            .map_err(|err| invalid_stored("car", plate, &err))?;
        Ok(Some(car))
    }

    fn list_all(&self) -> CoreResult<Vec<Car>> {
        let records = self.file.records()?;
        Ok(hydrate_all(records, self.path(), CarRecord::into_car))
    }

    fn update(&self, car: &Car) -> CoreResult<bool> {
        self.file
            .replace(|record| record.plate == car.plate(), CarRecord::from(car))
    }

    fn delete(&self, plate: &str) -> CoreResult<bool> {
        self.file.remove(|record| record.plate == plate)
    }
}

/// Stored shape of an appointment: the customer and car are kept as foreign
/// keys and resolved again on every read.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct AppointmentRecord {
    date: String,
    time: String,
    cost: f64,
    customer_dni: String,
    car_plate: String,
}

impl From<&Appointment> for AppointmentRecord {
    fn from(appointment: &Appointment) -> Self {
        Self {
            date: appointment.date().format(DATE_FORMAT).to_string(),
            time: appointment.time().format(TIME_FORMAT).to_string(),
            cost: appointment.cost(),
            customer_dni: appointment.customer().dni().to_string(),
            car_plate: appointment.car().plate().to_string(),
        }
    }
}

impl AppointmentRecord {
    fn is_on(&self, date: NaiveDate) -> bool {
        parse_date("date", &self.date).is_ok_and(|stored| stored == date)
    }

    fn matches(&self, key: &AppointmentKey) -> bool {
        self.car_plate == key.plate
            && self.is_on(key.date)
            && parse_time("time", &self.time).is_ok_and(|stored| stored == key.time)
    }
}

/// Appointment store backed by a single JSON file, resolving customers and
/// cars through the injected repositories.
#[derive(Debug, Clone)]
pub struct JsonAppointmentRepository<C, K> {
    file: JsonFile<AppointmentRecord>,
    customers: C,
    cars: K,
}

impl<C: CustomerRepository, K: CarRepository> JsonAppointmentRepository<C, K> {
    /// Open the store, creating an empty one if the file does not exist.
    pub fn open(path: impl Into<PathBuf>, customers: C, cars: K) -> CoreResult<Self> {
        Ok(Self {
            file: JsonFile::open(path.into())?,
            customers,
            cars,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    fn resolve_customer(&self, dni: &str) -> Reference<Customer> {
        match self.customers.get_by_dni(dni) {
            Ok(Some(customer)) => Reference::Resolved(customer),
            Ok(None) => {
                debug!(dni, "appointment references a missing customer");
                Reference::Unresolved { key: dni.to_string() }
            }
            Err(err) => {
                warn!(dni, error = %err, "customer lookup failed, leaving reference unresolved");
                Reference::Unresolved { key: dni.to_string() }
            }
        }
    }

    fn resolve_car(&self, plate: &str) -> Reference<Car> {
        match self.cars.get_by_plate(plate) {
            Ok(Some(car)) => Reference::Resolved(car),
            Ok(None) => {
                debug!(plate, "appointment references a missing car");
                Reference::Unresolved { key: plate.to_string() }
            }
            Err(err) => {
                warn!(plate, error = %err, "car lookup failed, leaving reference unresolved");
                Reference::Unresolved { key: plate.to_string() }
            }
        }
    }

    fn hydrate(&self, record: AppointmentRecord) -> CoreResult<Appointment> {
        let date = parse_date("date", &record.date)?;
        let time = parse_time("time", &record.time)?;
        let customer = self.resolve_customer(&record.customer_dni);
        let car = self.resolve_car(&record.car_plate);
        Appointment::new(customer, car, date, time, record.cost)
    }

    fn find_where(
        &self,
        predicate: impl Fn(&AppointmentRecord) -> bool,
    ) -> CoreResult<Vec<Appointment>> {
        let records: Vec<_> = self
            .file
            .records()?
            .into_iter()
            .filter(|record| predicate(record))
            .collect();
        Ok(hydrate_all(records, self.path(), |record| self.hydrate(record)))
    }
}

impl<C: CustomerRepository, K: CarRepository> AppointmentRepository
    for JsonAppointmentRepository<C, K>
{
    fn add(&self, appointment: &Appointment) -> CoreResult<()> {
        self.file.append(AppointmentRecord::from(appointment))
    }

    fn list_all(&self) -> CoreResult<Vec<Appointment>> {
        self.find_where(|_| true)
    }

    fn find_by_date(&self, date: NaiveDate) -> CoreResult<Vec<Appointment>> {
        self.find_where(|record| record.is_on(date))
    }

    fn find_by_customer(&self, dni: &str) -> CoreResult<Vec<Appointment>> {
        self.find_where(|record| record.customer_dni == dni)
    }

    fn find_by_car(&self, plate: &str) -> CoreResult<Vec<Appointment>> {
        self.find_where(|record| record.car_plate == plate)
    }

    fn update(&self, appointment: &Appointment) -> CoreResult<bool> {
        let key = appointment.key();
        self.file.replace(
            |record| record.matches(&key),
            AppointmentRecord::from(appointment),
        )
    }

    fn delete(&self, key: &AppointmentKey) -> CoreResult<bool> {
        self.file.remove(|record| record.matches(key))
    }
}

/// Appointment store wired to the JSON customer and car stores.
pub type JsonAppointments = JsonAppointmentRepository<JsonCustomerRepository, JsonCarRepository>;

/// The three stores of one data directory, wired together.
#[derive(Debug, Clone)]
pub struct JsonStores {
    /// Customer store.
    pub customers: JsonCustomerRepository,
    /// Car store.
    pub cars: JsonCarRepository,
    /// Appointment store resolving through copies of the two above.
    pub appointments: JsonAppointments,
}

impl JsonStores {
    /// Open (and create if needed) every store under `root`.
    pub fn open(root: &Path) -> CoreResult<Self> {
        let files = DataFiles::new(root);
        let customers = JsonCustomerRepository::open(files.customers)?;
        let cars = JsonCarRepository::open(files.cars)?;
        let appointments =
            JsonAppointmentRepository::open(files.appointments, customers.clone(), cars.clone())?;
        Ok(Self {
            customers,
            cars,
            appointments,
        })
    }
}

/// Persisted front-end settings.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkshopConfig {
    /// Directory holding the three store files.
    pub data_dir: Option<String>,
}

impl WorkshopConfig {
    /// Let `WORKSHOP_DATA_DIR` take precedence over the stored directory.
    #[must_use]
    pub fn with_env_override(self) -> Self {
        match std::env::var(DATA_DIR_ENV) {
            Ok(value) if !value.trim().is_empty() => Self {
                data_dir: Some(value),
            },
            _ => self,
        }
    }

    /// Configured data directory, ignoring blank values.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }
}

/// Location of `config.yaml` (for example ~/.config/workshop/config.yaml).
pub fn config_file() -> CoreResult<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| CoreError::Storage("unable to determine config directory".into()))?;
    Ok(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Read the config file, defaulting when it does not exist.
pub fn load_config() -> CoreResult<WorkshopConfig> {
    let path = config_file()?;
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(WorkshopConfig::default());
        }
        Err(err) => return Err(CoreError::Storage(err.to_string())),
    };
    serde_yaml::from_str(&contents)
        .map_err(|err| CoreError::Storage(format!("{}: {err}", path.display())))
}

/// Write the config file, creating its directory on first use.
pub fn save_config(config: &WorkshopConfig) -> CoreResult<()> {
    let path = config_file()?;
    let contents =
        serde_yaml::to_string(config).map_err(|err| CoreError::Storage(err.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
    }
    fs::write(&path, contents).map_err(|err| CoreError::Storage(err.to_string()))?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

/// Remember `path` as the data directory.
pub fn set_config_data_dir(path: &Path) -> CoreResult<()> {
    save_config(&WorkshopConfig {
        data_dir: Some(path.to_string_lossy().into_owned()),
    })
}

/// Default data directory (for example ~/.local/share/workshop).
pub fn default_data_dir() -> CoreResult<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| CoreError::Storage("unable to determine a default data directory".into()))?;
    Ok(dir.join(APP_DIR_NAME))
}

/// Resolve the data directory: environment, then config file, then default.
pub fn resolve_data_dir() -> CoreResult<PathBuf> {
    match load_config()?.with_env_override().data_dir() {
        Some(path) => Ok(path),
        None => default_data_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn juan() -> Customer {
        Customer::new(
            "12345678a",
            "juan",
            "pérez garcía",
            date(1990, 1, 1),
            "Juan@Test.com",
            "600123456",
        )
        .unwrap()
    }

    fn corolla() -> Car {
        Car::new("1234abc", "Toyota", "Corolla", 2020, None).unwrap()
    }

    fn stores(temp: &TempDir) -> JsonStores {
        JsonStores::open(temp.path()).expect("open stores")
    }

    fn booking(
        customer: &Customer,
        car: &Car,
        on: NaiveDate,
        at: NaiveTime,
        cost: f64,
    ) -> Appointment {
        Appointment::new(customer.clone(), car.clone(), on, at, cost).unwrap()
    }

    #[test]
    fn open_creates_empty_array_files() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path().join("nested").join("data");
        JsonStores::open(&root).expect("open stores");

        let files = DataFiles::new(&root);
        for path in [files.customers, files.cars, files.appointments] {
            assert_eq!(fs::read_to_string(path).unwrap(), "[]");
        }
    }

    #[test]
    fn customer_store_writes_flat_records() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        stores.customers.add(&juan()).expect("add customer");

        let contents = fs::read_to_string(stores.customers.path()).unwrap();
        insta::assert_snapshot!(contents, @r#"
        [
            {
                "dni": "12345678A",
                "name": "Juan",
                "surname": "Pérez García",
                "birth_date": "1990-01-01",
                "email": "juan@test.com",
                "phone": "600123456"
            }
        ]
        "#);
    }

    #[test]
    fn car_store_writes_null_revision() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        stores.cars.add(&corolla()).expect("add car");

        let contents = fs::read_to_string(stores.cars.path()).unwrap();
        insta::assert_snapshot!(contents, @r#"
        [
            {
                "plate": "1234ABC",
                "brand": "Toyota",
                "model": "Corolla",
                "year": 2020,
                "last_revision": null
            }
        ]
        "#);
    }

    #[test]
    fn appointment_store_keeps_foreign_keys_only() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let (customer, car) = (juan(), corolla());
        stores.customers.add(&customer).unwrap();
        stores.cars.add(&car).unwrap();
        stores
            .appointments
            .add(&booking(&customer, &car, date(2099, 1, 15), time(10, 30), 120.5))
            .expect("add appointment");

        let contents = fs::read_to_string(stores.appointments.path()).unwrap();
        insta::assert_snapshot!(contents, @r#"
        [
            {
                "date": "2099-01-15",
                "time": "10:30:00",
                "cost": 120.5,
                "customer_dni": "12345678A",
                "car_plate": "1234ABC"
            }
        ]
        "#);
    }

    #[test]
    fn customer_crud_reports_missing_keys() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let customer = juan();
        stores.customers.add(&customer).unwrap();

        let fetched = stores.customers.get_by_dni("12345678A").unwrap();
        assert_eq!(fetched, Some(customer.clone()));
        assert_eq!(stores.customers.get_by_dni("99999999Z").unwrap(), None);

        let moved = Customer::new(
            "12345678A",
            "Juan",
            "Pérez",
            date(1990, 1, 1),
            "nuevo@test.com",
            "600123456",
        )
        .unwrap();
        assert!(stores.customers.update(&moved).unwrap());
        assert_eq!(
            stores.customers.get_by_dni("12345678A").unwrap().unwrap().email(),
            "nuevo@test.com"
        );

        let stranger = Customer::new(
            "87654321B",
            "Ana",
            "Ruiz",
            date(1985, 5, 5),
            "ana@test.com",
            "611222333",
        )
        .unwrap();
        let before = fs::read(stores.customers.path()).unwrap();
        assert!(!stores.customers.update(&stranger).unwrap());
        assert!(!stores.customers.delete("87654321B").unwrap());
        assert_eq!(fs::read(stores.customers.path()).unwrap(), before);

        assert!(stores.customers.delete("12345678A").unwrap());
        assert!(stores.customers.list_all().unwrap().is_empty());
    }

    #[test]
    fn car_revision_survives_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let car = Car::new("5678XYZ", "Seat", "Ibiza", 2012, Some(date(2023, 9, 1))).unwrap();
        stores.cars.add(&car).unwrap();

        let reopened = JsonCarRepository::open(stores.cars.path()).unwrap();
        let fetched = reopened.get_by_plate("5678XYZ").unwrap().unwrap();
        assert_eq!(fetched.last_revision(), Some(date(2023, 9, 1)));
        assert_eq!(reopened.list_all().unwrap(), vec![car]);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        fs::write(stores.cars.path(), "{ not json").unwrap();

        assert!(stores.cars.list_all().unwrap().is_empty());
        assert_eq!(stores.cars.get_by_plate("1234ABC").unwrap(), None);

        stores.cars.add(&corolla()).unwrap();
        assert_eq!(stores.cars.list_all().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        fs::remove_file(stores.customers.path()).unwrap();
        assert!(stores.customers.list_all().unwrap().is_empty());
    }

    #[test]
    fn invalid_stored_record_is_skipped_by_list_and_reported_by_get() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        stores.cars.add(&corolla()).unwrap();
        let mut contents = fs::read_to_string(stores.cars.path()).unwrap();
        contents = contents.replacen(
            "[",
            r#"[{"plate": "BAD", "brand": "X", "model": "Y", "year": 2000},"#,
            1,
        );
        fs::write(stores.cars.path(), contents).unwrap();

        assert_eq!(stores.cars.list_all().unwrap(), vec![corolla()]);
        assert!(matches!(
            stores.cars.get_by_plate("BAD"),
            Err(CoreError::Storage(_))
        ));
    }

    #[test]
    fn mistyped_element_survives_writes() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        stores.cars.add(&corolla()).unwrap();
        let contents = fs::read_to_string(stores.cars.path()).unwrap().replacen(
            "[",
            r#"[{"plate": "5678XYZ", "brand": "Seat", "model": "Ibiza", "year": "2012"},"#,
            1,
        );
        fs::write(stores.cars.path(), contents).unwrap();

        assert_eq!(stores.cars.list_all().unwrap(), vec![corolla()]);
        assert_eq!(stores.cars.get_by_plate("5678XYZ").unwrap(), None);

        let clio = Car::new("9999BBB", "Renault", "Clio", 2018, None).unwrap();
        stores.cars.add(&clio).unwrap();
        assert_eq!(stores.cars.list_all().unwrap(), vec![corolla(), clio]);
        assert!(stores.cars.delete("1234ABC").unwrap());

        let stored: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(stores.cars.path()).unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["plate"], "5678XYZ");
        assert_eq!(stored[0]["year"], "2012");
        assert_eq!(stored[1]["plate"], "9999BBB");
    }

    #[test]
    fn appointments_reflect_current_customer_and_car() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let (customer, car) = (juan(), corolla());
        stores.customers.add(&customer).unwrap();
        stores.cars.add(&car).unwrap();
        let original = booking(&customer, &car, date(2099, 3, 10), time(9, 0), 75.0);
        stores.appointments.add(&original).unwrap();

        let revised =
            Car::new("1234ABC", "Toyota", "Corolla", 2020, Some(date(2024, 1, 1))).unwrap();
        stores.cars.update(&revised).unwrap();

        let reopened = JsonStores::open(temp.path()).unwrap();
        let found = reopened.appointments.find_by_car("1234ABC").unwrap();
        assert_eq!(found.len(), 1);
        let loaded = &found[0];
        assert_eq!(loaded.date(), original.date());
        assert_eq!(loaded.time(), original.time());
        assert_eq!(loaded.cost(), original.cost());
        assert_eq!(loaded.car().resolved(), Some(&revised));
        assert_eq!(loaded.customer().resolved(), Some(&customer));
    }

    #[test]
    fn deleted_car_leaves_unresolved_reference() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let (customer, car) = (juan(), corolla());
        stores.customers.add(&customer).unwrap();
        stores.cars.add(&car).unwrap();
        let appointment = booking(&customer, &car, date(2099, 3, 10), time(9, 0), 75.0);
        stores.appointments.add(&appointment).unwrap();

        assert!(stores.cars.delete("1234ABC").unwrap());

        let listed = stores.appointments.list_all().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].car(),
            &Reference::Unresolved {
                key: "1234ABC".into()
            }
        );
        assert!(listed[0].customer().is_resolved());

        assert!(stores.appointments.delete(&listed[0].key()).unwrap());
        assert!(stores.appointments.list_all().unwrap().is_empty());
    }

    #[test]
    fn finders_filter_by_date_customer_and_car() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let (customer, car) = (juan(), corolla());
        let other = Car::new("9999BBB", "Renault", "Clio", 2018, None).unwrap();
        stores.customers.add(&customer).unwrap();
        stores.cars.add(&car).unwrap();
        stores.cars.add(&other).unwrap();
        stores
            .appointments
            .add(&booking(&customer, &car, date(2099, 1, 1), time(9, 0), 10.0))
            .unwrap();
        stores
            .appointments
            .add(&booking(&customer, &other, date(2099, 1, 2), time(9, 0), 20.0))
            .unwrap();

        assert_eq!(stores.appointments.find_by_date(date(2099, 1, 2)).unwrap().len(), 1);
        assert_eq!(stores.appointments.find_by_customer("12345678A").unwrap().len(), 2);
        assert_eq!(stores.appointments.find_by_car("9999BBB").unwrap()[0].cost(), 20.0);
        assert!(stores.appointments.find_by_date(date(2099, 1, 3)).unwrap().is_empty());
    }

    #[test]
    fn appointment_update_matches_natural_key_only() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        let (customer, car) = (juan(), corolla());
        stores.customers.add(&customer).unwrap();
        stores.cars.add(&car).unwrap();
        stores
            .appointments
            .add(&booking(&customer, &car, date(2099, 1, 1), time(9, 0), 10.0))
            .unwrap();

        let before = fs::read(stores.appointments.path()).unwrap();
        let elsewhere = booking(&customer, &car, date(2099, 1, 1), time(11, 0), 99.0);
        assert!(!stores.appointments.update(&elsewhere).unwrap());
        assert!(!stores.appointments.delete(&elsewhere.key()).unwrap());
        assert_eq!(fs::read(stores.appointments.path()).unwrap(), before);

        let repriced = booking(&customer, &car, date(2099, 1, 1), time(9, 0), 45.0);
        assert!(stores.appointments.update(&repriced).unwrap());
        assert_eq!(stores.appointments.list_all().unwrap()[0].cost(), 45.0);
    }

    #[test]
    fn legacy_times_with_fractions_still_match() {
        let temp = TempDir::new().expect("temp dir");
        let stores = stores(&temp);
        fs::write(
            stores.appointments.path(),
            serde_json::json!([{
                "date": "2099-02-02",
                "time": "08:15:00.500000",
                "cost": 5,
                "customer_dni": "11111111A",
                "car_plate": "0000AAA"
            }])
            .to_string(),
        )
        .unwrap();

        let listed = stores.appointments.list_all().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].time(), NaiveTime::from_hms_opt(8, 15, 0).unwrap());
        assert!(!listed[0].customer().is_resolved());
        assert!(stores
            .appointments
            .delete(&AppointmentKey::new("0000AAA", date(2099, 2, 2), time(8, 15)))
            .unwrap());
    }

    #[test]
    fn data_files_live_under_root() {
        let files = DataFiles::new(Path::new("/srv/taller"));
        assert_eq!(files.customers, PathBuf::from("/srv/taller/customers.json"));
        assert_eq!(files.cars, PathBuf::from("/srv/taller/cars.json"));
        assert_eq!(files.appointments, PathBuf::from("/srv/taller/appointments.json"));
    }

    #[test]
    fn blank_config_entry_has_no_data_dir() {
        let blank = WorkshopConfig {
            data_dir: Some("   ".into()),
        };
        assert_eq!(blank.data_dir(), None);

        let set = WorkshopConfig {
            data_dir: Some(" /srv/taller ".into()),
        };
        assert_eq!(set.data_dir(), Some(PathBuf::from("/srv/taller")));
    }

    #[test]
    fn environment_overrides_data_dir() {
        std::env::set_var(DATA_DIR_ENV, "/tmp/workshop-env-test");
        let resolved = resolve_data_dir().unwrap();
        std::env::remove_var(DATA_DIR_ENV);
        assert_eq!(resolved, PathBuf::from("/tmp/workshop-env-test"));
    }
}
