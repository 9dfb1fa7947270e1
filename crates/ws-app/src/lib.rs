//! Use cases for the workshop: one service per operation, each exposing a
//! single `execute`.
//!
//! Services only see the repository traits from `ws-core`; which store backs
//! them is decided by the caller.

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use ws_core::{
    Appointment, AppointmentKey, AppointmentRepository, Car, CarRepository, Clock, CoreError,
    CoreResult, Customer, CustomerRepository, SystemClock,
};
use ws_utils::normalize_key;

/// Register a new customer, rejecting a DNI that is already stored.
pub struct RegisterCustomer<'a> {
    customers: &'a dyn CustomerRepository,
}

impl<'a> RegisterCustomer<'a> {
    pub fn new(customers: &'a dyn CustomerRepository) -> Self {
        Self { customers }
    }

    pub fn execute(&self, customer: Customer) -> CoreResult<Customer> {
        if self.customers.get_by_dni(customer.dni())?.is_some() {
            return Err(CoreError::Duplicate {
                entity: "customer",
                key: customer.dni().to_string(),
            });
        }
        self.customers.add(&customer)?;
        info!(dni = customer.dni(), "customer registered");
        Ok(customer)
    }
}

/// Look up one customer by DNI.
pub struct GetCustomerByDni<'a> {
    customers: &'a dyn CustomerRepository,
}

impl<'a> GetCustomerByDni<'a> {
    pub fn new(customers: &'a dyn CustomerRepository) -> Self {
        Self { customers }
    }

    pub fn execute(&self, raw_dni: &str) -> CoreResult<Option<Customer>> {
        self.customers.get_by_dni(&normalize_key(raw_dni))
    }
}

/// List every customer.
pub struct ListCustomers<'a> {
    customers: &'a dyn CustomerRepository,
}

impl<'a> ListCustomers<'a> {
    pub fn new(customers: &'a dyn CustomerRepository) -> Self {
        Self { customers }
    }

    pub fn execute(&self) -> CoreResult<Vec<Customer>> {
        self.customers.list_all()
    }
}

/// Replace a stored customer with a freshly validated one.
pub struct UpdateCustomer<'a> {
    customers: &'a dyn CustomerRepository,
}

impl<'a> UpdateCustomer<'a> {
    pub fn new(customers: &'a dyn CustomerRepository) -> Self {
        Self { customers }
    }

    pub fn execute(&self, customer: Customer) -> CoreResult<Customer> {
        if self.customers.get_by_dni(customer.dni())?.is_none() {
            return Err(CoreError::NotFound {
                entity: "customer",
                key: customer.dni().to_string(),
            });
        }
        self.customers.update(&customer)?;
        info!(dni = customer.dni(), "customer updated");
        Ok(customer)
    }
}

/// Delete a customer by DNI. Appointments referencing it are kept.
pub struct DeleteCustomer<'a> {
    customers: &'a dyn CustomerRepository,
}

impl<'a> DeleteCustomer<'a> {
    pub fn new(customers: &'a dyn CustomerRepository) -> Self {
        Self { customers }
    }

    /// Returns whether a customer was removed.
    pub fn execute(&self, raw_dni: &str) -> CoreResult<bool> {
        let dni = normalize_key(raw_dni);
        let removed = self.customers.delete(&dni)?;
        if removed {
            info!(%dni, "customer deleted");
        }
        Ok(removed)
    }
}

/// Register a new car, rejecting a plate that is already stored.
pub struct RegisterCar<'a> {
    cars: &'a dyn CarRepository,
}

impl<'a> RegisterCar<'a> {
    pub fn new(cars: &'a dyn CarRepository) -> Self {
        Self { cars }
    }

    pub fn execute(&self, car: Car) -> CoreResult<Car> {
        if self.cars.get_by_plate(car.plate())?.is_some() {
            return Err(CoreError::Duplicate {
                entity: "car",
                key: car.plate().to_string(),
            });
        }
        self.cars.add(&car)?;
        info!(plate = car.plate(), "car registered");
        Ok(car)
    }
}

/// Look up one car by plate.
pub struct GetCarByPlate<'a> {
    cars: &'a dyn CarRepository,
}

impl<'a> GetCarByPlate<'a> {
    pub fn new(cars: &'a dyn CarRepository) -> Self {
        Self { cars }
    }

    pub fn execute(&self, raw_plate: &str) -> CoreResult<Option<Car>> {
        self.cars.get_by_plate(&normalize_key(raw_plate))
    }
}

/// List every car.
pub struct ListCars<'a> {
    cars: &'a dyn CarRepository,
}

impl<'a> ListCars<'a> {
    pub fn new(cars: &'a dyn CarRepository) -> Self {
        Self { cars }
    }

    pub fn execute(&self) -> CoreResult<Vec<Car>> {
        self.cars.list_all()
    }
}

/// Replace a stored car with a freshly validated one.
pub struct UpdateCar<'a> {
    cars: &'a dyn CarRepository,
}

impl<'a> UpdateCar<'a> {
    pub fn new(cars: &'a dyn CarRepository) -> Self {
        Self { cars }
    }

    pub fn execute(&self, car: Car) -> CoreResult<Car> {
        if self.cars.get_by_plate(car.plate())?.is_none() {
            return Err(CoreError::NotFound {
                entity: "car",
                key: car.plate().to_string(),
            });
        }
        self.cars.update(&car)?;
        info!(plate = car.plate(), "car updated");
        Ok(car)
    }
}

/// Delete a car by plate. Appointments referencing it are kept.
pub struct DeleteCar<'a> {
    cars: &'a dyn CarRepository,
}

impl<'a> DeleteCar<'a> {
    pub fn new(cars: &'a dyn CarRepository) -> Self {
        Self { cars }
    }

    /// Returns whether a car was removed.
    pub fn execute(&self, raw_plate: &str) -> CoreResult<bool> {
        let plate = normalize_key(raw_plate);
        let removed = self.cars.delete(&plate)?;
        if removed {
            info!(%plate, "car deleted");
        }
        Ok(removed)
    }
}

/// What the caller asks for when booking a slot.
#[derive(Clone, Debug, PartialEq)]
pub struct AppointmentRequest {
    /// DNI of the customer, any casing.
    pub customer_dni: String,
    /// Plate of the car, any casing.
    pub car_plate: String,
    /// Day of the appointment.
    pub date: NaiveDate,
    /// Start time.
    pub time: NaiveTime,
    /// Agreed cost.
    pub cost: f64,
}

fn reject_past(appointment: &Appointment, clock: &dyn Clock) -> CoreResult<()> {
    if appointment.is_past_at(clock.now()) {
        return Err(CoreError::PastAppointment(appointment.starts_at()));
    }
    Ok(())
}

/// Fail with `Duplicate` when another appointment already holds `key`.
fn reject_taken_slot(
    appointments: &dyn AppointmentRepository,
    key: &AppointmentKey,
    vacating: Option<&AppointmentKey>,
) -> CoreResult<()> {
    let taken = appointments
        .find_by_car(&key.plate)?
        .iter()
        .map(Appointment::key)
        .any(|held| held == *key && Some(&held) != vacating);
    if taken {
        return Err(CoreError::Duplicate {
            entity: "appointment",
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Resolve both references, build the appointment, and check it is not past.
fn prepare_appointment(
    customers: &dyn CustomerRepository,
    cars: &dyn CarRepository,
    clock: &dyn Clock,
    request: &AppointmentRequest,
) -> CoreResult<Appointment> {
    let dni = normalize_key(&request.customer_dni);
    let plate = normalize_key(&request.car_plate);

    let customer = customers
        .get_by_dni(&dni)?
        .ok_or(CoreError::NotFound {
            entity: "customer",
            key: dni,
        })?;
    let car = cars.get_by_plate(&plate)?.ok_or(CoreError::NotFound {
        entity: "car",
        key: plate,
    })?;

    let appointment = Appointment::new(customer, car, request.date, request.time, request.cost)?;
    reject_past(&appointment, clock)?;
    Ok(appointment)
}

/// Book a new appointment for an existing customer and car.
pub struct ScheduleAppointment<'a> {
    appointments: &'a dyn AppointmentRepository,
    customers: &'a dyn CustomerRepository,
    cars: &'a dyn CarRepository,
    clock: &'a dyn Clock,
}

impl<'a> ScheduleAppointment<'a> {
    pub fn new(
        appointments: &'a dyn AppointmentRepository,
        customers: &'a dyn CustomerRepository,
        cars: &'a dyn CarRepository,
    ) -> Self {
        Self {
            appointments,
            customers,
            cars,
            clock: &SystemClock,
        }
    }

    /// Judge "the past" against `clock` instead of the system time.
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn execute(&self, request: &AppointmentRequest) -> CoreResult<Appointment> {
        let appointment = prepare_appointment(self.customers, self.cars, self.clock, request)?;
        reject_taken_slot(self.appointments, &appointment.key(), None)?;
        self.appointments.add(&appointment)?;
        info!(key = %appointment.key(), "appointment scheduled");
        Ok(appointment)
    }
}

/// List every appointment, or only those of one day.
pub struct ListAppointments<'a> {
    appointments: &'a dyn AppointmentRepository,
}

impl<'a> ListAppointments<'a> {
    pub fn new(appointments: &'a dyn AppointmentRepository) -> Self {
        Self { appointments }
    }

    pub fn execute(&self, date: Option<NaiveDate>) -> CoreResult<Vec<Appointment>> {
        match date {
            Some(date) => self.appointments.find_by_date(date),
            None => self.appointments.list_all(),
        }
    }
}

/// List the appointments of one customer.
pub struct ListAppointmentsByCustomer<'a> {
    appointments: &'a dyn AppointmentRepository,
}

impl<'a> ListAppointmentsByCustomer<'a> {
    pub fn new(appointments: &'a dyn AppointmentRepository) -> Self {
        Self { appointments }
    }

    pub fn execute(&self, raw_dni: &str) -> CoreResult<Vec<Appointment>> {
        self.appointments.find_by_customer(&normalize_key(raw_dni))
    }
}

/// List the appointments of one car.
pub struct ListAppointmentsByCar<'a> {
    appointments: &'a dyn AppointmentRepository,
}

impl<'a> ListAppointmentsByCar<'a> {
    pub fn new(appointments: &'a dyn AppointmentRepository) -> Self {
        Self { appointments }
    }

    pub fn execute(&self, raw_plate: &str) -> CoreResult<Vec<Appointment>> {
        self.appointments.find_by_car(&normalize_key(raw_plate))
    }
}

/// Replace the appointment stored under the same (plate, date, time).
pub struct UpdateAppointment<'a> {
    appointments: &'a dyn AppointmentRepository,
    clock: &'a dyn Clock,
}

impl<'a> UpdateAppointment<'a> {
    pub fn new(appointments: &'a dyn AppointmentRepository) -> Self {
        Self {
            appointments,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns whether a stored appointment matched the key.
    pub fn execute(&self, appointment: &Appointment) -> CoreResult<bool> {
        reject_past(appointment, self.clock)?;
        let updated = self.appointments.update(appointment)?;
        if updated {
            info!(key = %appointment.key(), "appointment updated");
        }
        Ok(updated)
    }
}

/// Cancel an appointment by its natural key.
pub struct DeleteAppointment<'a> {
    appointments: &'a dyn AppointmentRepository,
}

impl<'a> DeleteAppointment<'a> {
    pub fn new(appointments: &'a dyn AppointmentRepository) -> Self {
        Self { appointments }
    }

    /// Returns whether an appointment was removed. The key must carry the
    /// original date and time.
    pub fn execute(&self, key: &AppointmentKey) -> CoreResult<bool> {
        let removed = self.appointments.delete(key)?;
        if removed {
            info!(%key, "appointment cancelled");
        }
        Ok(removed)
    }
}

/// Move an appointment to a new slot, car, customer, or cost.
///
/// The replacement is fully validated before the original is removed, so a
/// rejected request leaves the store as it was.
pub struct RescheduleAppointment<'a> {
    appointments: &'a dyn AppointmentRepository,
    customers: &'a dyn CustomerRepository,
    cars: &'a dyn CarRepository,
    clock: &'a dyn Clock,
}

impl<'a> RescheduleAppointment<'a> {
    pub fn new(
        appointments: &'a dyn AppointmentRepository,
        customers: &'a dyn CustomerRepository,
        cars: &'a dyn CarRepository,
    ) -> Self {
        Self {
            appointments,
            customers,
            cars,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn execute(
        &self,
        original: &AppointmentKey,
        request: &AppointmentRequest,
    ) -> CoreResult<Appointment> {
        let stored = self
            .appointments
            .find_by_car(&original.plate)?
            .into_iter()
            .any(|appointment| appointment.key() == *original);
        if !stored {
            return Err(CoreError::NotFound {
                entity: "appointment",
                key: original.to_string(),
            });
        }

        let replacement = prepare_appointment(self.customers, self.cars, self.clock, request)?;
        reject_taken_slot(self.appointments, &replacement.key(), Some(original))?;
        self.appointments.delete(original)?;
        self.appointments.add(&replacement)?;
        info!(from = %original, to = %replacement.key(), "appointment rescheduled");
        Ok(replacement)
    }
}
