use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{ArgAction, Args, Parser, Subcommand};

use ws_app::{
    AppointmentRequest, DeleteAppointment, DeleteCar, DeleteCustomer, GetCarByPlate,
    GetCustomerByDni, ListAppointments, ListAppointmentsByCar, ListAppointmentsByCustomer,
    ListCars, ListCustomers, RegisterCar, RegisterCustomer, RescheduleAppointment,
    ScheduleAppointment, UpdateAppointment, UpdateCar, UpdateCustomer,
};
use ws_core::{Appointment, AppointmentKey, Car, CoreError, Customer, Reference};
use ws_fs::{default_data_dir, resolve_data_dir, set_config_data_dir, JsonStores};
use ws_utils::normalize_key;

#[derive(Parser)]
#[command(name = "workshop", version, about = "Workshop customers, cars, and appointments")]
struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data files and remember their directory.
    Init {
        /// Optional directory for the data files.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Manage customers.
    Customer {
        #[command(subcommand)]
        action: CustomerCommand,
    },
    /// Manage cars.
    Car {
        #[command(subcommand)]
        action: CarCommand,
    },
    /// Manage appointments.
    Appointment {
        #[command(subcommand)]
        action: AppointmentCommand,
    },
}

#[derive(Subcommand)]
enum CustomerCommand {
    /// Register a new customer.
    Add {
        #[arg(long)]
        dni: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        surname: String,
        /// Birth date as YYYY-MM-DD.
        #[arg(long)]
        birth_date: NaiveDate,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
    },
    /// List all customers.
    List,
    /// Show one customer.
    Show { dni: String },
    /// Change some fields of a customer.
    Update {
        dni: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        surname: Option<String>,
        #[arg(long)]
        birth_date: Option<NaiveDate>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Delete a customer. Their appointments are kept.
    Delete { dni: String },
}

#[derive(Subcommand)]
enum CarCommand {
    /// Register a new car.
    Add {
        #[arg(long)]
        plate: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        year: i32,
        /// Date of the last revision as YYYY-MM-DD.
        #[arg(long)]
        last_revision: Option<NaiveDate>,
    },
    /// List all cars and whether they need a revision.
    List,
    /// Show one car.
    Show { plate: String },
    /// Change some fields of a car.
    Update {
        plate: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        last_revision: Option<NaiveDate>,
        /// Forget the last revision date.
        #[arg(long, conflicts_with = "last_revision")]
        clear_revision: bool,
    },
    /// Delete a car. Its appointments are kept.
    Delete { plate: String },
}

/// Identifies a booked slot by its natural key.
#[derive(Args)]
struct SlotArgs {
    /// Plate of the booked car.
    #[arg(long)]
    plate: String,
    /// Day as YYYY-MM-DD.
    #[arg(long)]
    date: NaiveDate,
    /// Start time as HH:MM or HH:MM:SS.
    #[arg(long, value_parser = parse_time)]
    time: NaiveTime,
}

impl SlotArgs {
    fn key(&self) -> AppointmentKey {
        AppointmentKey::new(&self.plate, self.date, self.time)
    }
}

#[derive(Subcommand)]
enum AppointmentCommand {
    /// Book a new appointment.
    Schedule {
        /// DNI of the customer.
        #[arg(long)]
        dni: String,
        #[command(flatten)]
        slot: SlotArgs,
        #[arg(long, allow_hyphen_values = true)]
        cost: f64,
    },
    /// List appointments, optionally filtered.
    List {
        #[arg(long, conflicts_with_all = ["customer", "car"])]
        date: Option<NaiveDate>,
        /// DNI of the customer.
        #[arg(long, conflicts_with = "car")]
        customer: Option<String>,
        /// Plate of the car.
        #[arg(long)]
        car: Option<String>,
    },
    /// Change the customer or cost of a booked slot.
    Update {
        #[command(flatten)]
        slot: SlotArgs,
        /// DNI of the new customer.
        #[arg(long)]
        dni: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        cost: Option<f64>,
    },
    /// Move a booked slot to another day, time, car, customer, or cost.
    Reschedule {
        #[command(flatten)]
        slot: SlotArgs,
        #[arg(long)]
        new_date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_time)]
        new_time: Option<NaiveTime>,
        #[arg(long)]
        new_plate: Option<String>,
        /// DNI of the new customer.
        #[arg(long)]
        dni: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        cost: Option<f64>,
    },
    /// Cancel a booked slot.
    Cancel {
        #[command(flatten)]
        slot: SlotArgs,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Command::Init { path } = &cli.command {
        let path = match path {
            Some(path) => path.clone(),
            None => default_data_dir()?,
        };
        JsonStores::open(&path).context("failed to initialize data directory")?;
        set_config_data_dir(&path)?;
        println!("Data directory initialized at {}", path.display());
        return Ok(());
    }

    let data_dir = resolve_data_dir()?;
    let stores = JsonStores::open(&data_dir)
        .with_context(|| format!("failed to open data files in {}", data_dir.display()))?;

    match cli.command {
        Command::Customer { action } => customer(&stores, action),
        Command::Car { action } => car(&stores, action),
        Command::Appointment { action } => appointment(&stores, action),
        Command::Init { .. } => unreachable!("handled above"),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => tracing::Level::ERROR,
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn customer(stores: &JsonStores, action: CustomerCommand) -> Result<()> {
    let today = Local::now().date_naive();
    match action {
        CustomerCommand::Add {
            dni,
            name,
            surname,
            birth_date,
            email,
            phone,
        } => {
            let customer = Customer::new(dni, name, surname, birth_date, email, phone)
                .context("invalid customer")?;
            let customer = RegisterCustomer::new(&stores.customers)
                .execute(customer)
                .context("failed to register customer")?;
            println!("{}", customer_row(&customer, today));
        }
        CustomerCommand::List => {
            let customers = ListCustomers::new(&stores.customers)
                .execute()
                .context("failed to list customers")?;
            for customer in customers {
                println!("{}", customer_row(&customer, today));
            }
        }
        CustomerCommand::Show { dni } => {
            let customer = GetCustomerByDni::new(&stores.customers)
                .execute(&dni)
                .context("failed to get customer")?;
            match customer {
                Some(customer) => println!("{}", customer_row(&customer, today)),
                None => eprintln!("{}", missing_customer(&dni)),
            }
        }
        CustomerCommand::Update {
            dni,
            name,
            surname,
            birth_date,
            email,
            phone,
        } => {
            let current = GetCustomerByDni::new(&stores.customers)
                .execute(&dni)?
                .ok_or_else(|| CoreError::NotFound {
                    entity: "customer",
                    key: normalize_key(&dni),
                })?;
            let merged = Customer::new(
                current.dni(),
                name.as_deref().unwrap_or(current.name()),
                surname.as_deref().unwrap_or(current.surname()),
                birth_date.unwrap_or(current.birth_date()),
                email.as_deref().unwrap_or(current.email()),
                phone.as_deref().unwrap_or(current.phone()),
            )
            .context("invalid customer")?;
            let customer = UpdateCustomer::new(&stores.customers)
                .execute(merged)
                .context("failed to update customer")?;
            println!("{}", customer_row(&customer, today));
        }
        CustomerCommand::Delete { dni } => {
            let removed = DeleteCustomer::new(&stores.customers)
                .execute(&dni)
                .context("failed to delete customer")?;
            if !removed {
                eprintln!("{}", missing_customer(&dni));
            }
        }
    }
    Ok(())
}

fn car(stores: &JsonStores, action: CarCommand) -> Result<()> {
    let today = Local::now().date_naive();
    match action {
        CarCommand::Add {
            plate,
            brand,
            model,
            year,
            last_revision,
        } => {
            let car = Car::new(plate, brand, model, year, last_revision).context("invalid car")?;
            let car = RegisterCar::new(&stores.cars)
                .execute(car)
                .context("failed to register car")?;
            println!("{}", car_row(&car, today));
        }
        CarCommand::List => {
            let cars = ListCars::new(&stores.cars)
                .execute()
                .context("failed to list cars")?;
            for car in cars {
                println!("{}", car_row(&car, today));
            }
        }
        CarCommand::Show { plate } => {
            let car = GetCarByPlate::new(&stores.cars)
                .execute(&plate)
                .context("failed to get car")?;
            match car {
                Some(car) => println!("{}", car_row(&car, today)),
                None => eprintln!("{}", missing_car(&plate)),
            }
        }
        CarCommand::Update {
            plate,
            brand,
            model,
            year,
            last_revision,
            clear_revision,
        } => {
            let current = GetCarByPlate::new(&stores.cars)
                .execute(&plate)?
                .ok_or_else(|| CoreError::NotFound {
                    entity: "car",
                    key: normalize_key(&plate),
                })?;
            let last_revision = if clear_revision {
                None
            } else {
                last_revision.or(current.last_revision())
            };
            let merged = Car::new(
                current.plate(),
                brand.as_deref().unwrap_or(current.brand()),
                model.as_deref().unwrap_or(current.model()),
                year.unwrap_or(current.year()),
                last_revision,
            )
            .context("invalid car")?;
            let car = UpdateCar::new(&stores.cars)
                .execute(merged)
                .context("failed to update car")?;
            println!("{}", car_row(&car, today));
        }
        CarCommand::Delete { plate } => {
            let removed = DeleteCar::new(&stores.cars)
                .execute(&plate)
                .context("failed to delete car")?;
            if !removed {
                eprintln!("{}", missing_car(&plate));
            }
        }
    }
    Ok(())
}

fn appointment(stores: &JsonStores, action: AppointmentCommand) -> Result<()> {
    match action {
        AppointmentCommand::Schedule { dni, slot, cost } => {
            let request = AppointmentRequest {
                customer_dni: dni,
                car_plate: slot.plate,
                date: slot.date,
                time: slot.time,
                cost,
            };
            let appointment =
                ScheduleAppointment::new(&stores.appointments, &stores.customers, &stores.cars)
                    .execute(&request)
                    .context("failed to schedule appointment")?;
            println!("{}", appointment_row(&appointment));
        }
        AppointmentCommand::List {
            date,
            customer,
            car,
        } => {
            let mut appointments = match (customer, car) {
                (Some(dni), _) => {
                    ListAppointmentsByCustomer::new(&stores.appointments).execute(&dni)
                }
                (None, Some(plate)) => {
                    ListAppointmentsByCar::new(&stores.appointments).execute(&plate)
                }
                (None, None) => ListAppointments::new(&stores.appointments).execute(date),
            }
            .context("failed to list appointments")?;
            appointments.sort_by_key(Appointment::starts_at);
            for appointment in appointments {
                println!("{}", appointment_row(&appointment));
            }
        }
        AppointmentCommand::Update { slot, dni, cost } => {
            let current = find_appointment(stores, &slot.key())?;
            let customer = match dni {
                Some(dni) => Reference::Resolved(
                    GetCustomerByDni::new(&stores.customers)
                        .execute(&dni)?
                        .ok_or_else(|| CoreError::NotFound {
                            entity: "customer",
                            key: normalize_key(&dni),
                        })?,
                ),
                None => current.customer().clone(),
            };
            let updated = Appointment::new(
                customer,
                current.car().clone(),
                current.date(),
                current.time(),
                cost.unwrap_or(current.cost()),
            )
            .context("invalid appointment")?;
            UpdateAppointment::new(&stores.appointments)
                .execute(&updated)
                .context("failed to update appointment")?;
            println!("{}", appointment_row(&updated));
        }
        AppointmentCommand::Reschedule {
            slot,
            new_date,
            new_time,
            new_plate,
            dni,
            cost,
        } => {
            let original = slot.key();
            let current = find_appointment(stores, &original)?;
            let request = AppointmentRequest {
                customer_dni: dni.unwrap_or_else(|| current.customer().dni().to_string()),
                car_plate: new_plate.unwrap_or_else(|| original.plate.clone()),
                date: new_date.unwrap_or(original.date),
                time: new_time.unwrap_or(original.time),
                cost: cost.unwrap_or(current.cost()),
            };
            let appointment =
                RescheduleAppointment::new(&stores.appointments, &stores.customers, &stores.cars)
                    .execute(&original, &request)
                    .context("failed to reschedule appointment")?;
            println!("{}", appointment_row(&appointment));
        }
        AppointmentCommand::Cancel { slot } => {
            let key = slot.key();
            let removed = DeleteAppointment::new(&stores.appointments)
                .execute(&key)
                .context("failed to cancel appointment")?;
            if !removed {
                eprintln!("no appointment for {key}");
            }
        }
    }
    Ok(())
}

fn find_appointment(stores: &JsonStores, key: &AppointmentKey) -> Result<Appointment> {
    let found = ListAppointmentsByCar::new(&stores.appointments)
        .execute(&key.plate)
        .context("failed to list appointments")?
        .into_iter()
        .find(|appointment| appointment.key() == *key)
        .ok_or_else(|| CoreError::NotFound {
            entity: "appointment",
            key: key.to_string(),
        })?;
    Ok(found)
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| format!("expected HH:MM or HH:MM:SS, got {value:?}"))
}

fn customer_row(customer: &Customer, today: NaiveDate) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{} years",
        customer.dni(),
        customer.full_name(),
        customer.email(),
        customer.phone(),
        customer.age_on(today)
    )
}

fn car_row(car: &Car, today: NaiveDate) -> String {
    let last_revision = car
        .last_revision()
        .map_or_else(|| "never".to_string(), |date| date.to_string());
    let status = if car.needs_revision_on(today) {
        "revision due"
    } else {
        "ok"
    };
    format!(
        "{}\t{} {}\t{}\t{}\t{}",
        car.plate(),
        car.brand(),
        car.model(),
        car.year(),
        last_revision,
        status
    )
}

fn customer_label(customer: &Reference<Customer>) -> String {
    match customer {
        Reference::Resolved(customer) => format!("{} {}", customer.dni(), customer.full_name()),
        Reference::Unresolved { key } => format!("<missing {key}>"),
    }
}

fn car_label(car: &Reference<Car>) -> String {
    match car {
        Reference::Resolved(car) => format!("{} {} {}", car.plate(), car.brand(), car.model()),
        Reference::Unresolved { key } => format!("<missing {key}>"),
    }
}

fn missing_customer(raw_dni: &str) -> String {
    format!("no customer with DNI {}", normalize_key(raw_dni))
}

fn missing_car(raw_plate: &str) -> String {
    format!("no car with plate {}", normalize_key(raw_plate))
}

fn appointment_row(appointment: &Appointment) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{:.2} €",
        appointment.date(),
        appointment.time().format("%H:%M"),
        customer_label(appointment.customer()),
        car_label(appointment.car()),
        appointment.cost()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn maria() -> Customer {
        Customer::new(
            "12345678z",
            "maría",
            "lópez",
            date(2000, 6, 15),
            "Maria@Mail.es",
            "600111222",
        )
        .unwrap()
    }

    #[test]
    fn parses_customer_add() {
        let cli = Cli::try_parse_from([
            "workshop",
            "customer",
            "add",
            "--dni",
            "12345678Z",
            "--name",
            "María",
            "--surname",
            "López",
            "--birth-date",
            "2000-06-15",
            "--email",
            "maria@mail.es",
            "--phone",
            "600111222",
        ])
        .expect("parse");
        let Command::Customer {
            action: CustomerCommand::Add { birth_date, .. },
        } = cli.command
        else {
            panic!("expected customer add");
        };
        assert_eq!(birth_date, date(2000, 6, 15));
    }

    #[test]
    fn parses_schedule_with_short_time_and_verbosity() {
        let cli = Cli::try_parse_from([
            "workshop",
            "-vv",
            "appointment",
            "schedule",
            "--dni",
            "12345678Z",
            "--plate",
            "1234abc",
            "--date",
            "2099-01-15",
            "--time",
            "10:30",
            "--cost",
            "-5",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        let Command::Appointment {
            action: AppointmentCommand::Schedule { slot, cost, .. },
        } = cli.command
        else {
            panic!("expected appointment schedule");
        };
        let half_past_ten = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        assert_eq!(
            slot.key(),
            AppointmentKey::new("1234ABC", date(2099, 1, 15), half_past_ten)
        );
        assert_eq!(cost, -5.0);
    }

    #[test]
    fn rejects_conflicting_list_filters() {
        let result = Cli::try_parse_from([
            "workshop",
            "appointment",
            "list",
            "--customer",
            "12345678Z",
            "--car",
            "1234ABC",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_time_accepts_minutes_and_seconds() {
        assert_eq!(parse_time("09:05"), Ok(NaiveTime::from_hms_opt(9, 5, 0).unwrap()));
        assert_eq!(parse_time("09:05:30"), Ok(NaiveTime::from_hms_opt(9, 5, 30).unwrap()));
        assert!(parse_time("9h").is_err());
    }

    #[test]
    fn customer_row_snapshot() {
        insta::assert_snapshot!(
            customer_row(&maria(), date(2024, 6, 14)),
            @"12345678Z\tMaría López\tmaria@mail.es\t600111222\t23 years"
        );
    }

    #[test]
    fn car_row_snapshot() {
        let car = Car::new("1234abc", "Seat", "Ibiza", 2015, Some(date(2023, 1, 10))).unwrap();
        insta::assert_snapshot!(
            car_row(&car, date(2024, 6, 14)),
            @"1234ABC\tSeat Ibiza\t2015\t2023-01-10\trevision due"
        );
    }

    #[test]
    fn appointment_row_marks_missing_references() {
        let appointment = Appointment::new(
            maria(),
            Reference::<Car>::unresolved("1234abc"),
            date(2099, 1, 15),
            NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            120.5,
        )
        .unwrap();
        insta::assert_snapshot!(
            appointment_row(&appointment),
            @"2099-01-15\t10:30\t12345678Z María López\t<missing 1234ABC>\t120.50 €"
        );
    }

    #[test]
    fn missing_keys_are_reported_normalized() {
        insta::assert_snapshot!(
            missing_customer(" 12345678z "),
            @"no customer with DNI 12345678Z"
        );
        insta::assert_snapshot!(missing_car("1234abc"), @"no car with plate 1234ABC");
    }
}
