//! Supply orders for the ESP-NOW kitchen challenge. The attached board
//! forwards whatever arrives on its serial port as `<CODE><quantity>\n`.
use std::{
    fmt::Display,
    io::Write,
    num::NonZeroU8,
    time::Duration,
};

use chrono::Local;
use log::info;

const CODE_LENGTH: usize = 5;
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidCode(String),
    InvalidQuantity(u32),
    UnknownProduct(String),
    Port(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductCode([u8; CODE_LENGTH]);

impl ProductCode {
    /// Five ASCII letters, case insensitive.
    pub fn parse(code: &str) -> Result<Self, Error> {
        let bytes = code.as_bytes();
        if bytes.len() != CODE_LENGTH || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(Error::InvalidCode(code.to_string()));
        }
        let mut out = [0; CODE_LENGTH];
        for (index, c) in bytes.iter().enumerate() {
            out[index] = c.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        // only ever built from ASCII letters
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Display for ProductCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Product {
    pub name: &'static str,
    pub code: &'static str,
    pub default_quantity: u8,
}

pub const CATALOGUE: [Product; 6] = [
    Product {
        name: "Burger patties",
        code: "HBRGR",
        default_quantity: 50,
    },
    Product {
        name: "Seaweed bread",
        code: "SWBRD",
        default_quantity: 50,
    },
    Product {
        name: "Shrimp sauce",
        code: "SHRMP",
        default_quantity: 15,
    },
    Product {
        name: "Pickles",
        code: "PICKL",
        default_quantity: 20,
    },
    Product {
        name: "Tomato",
        code: "TMATO",
        default_quantity: 20,
    },
    Product {
        name: "Lettuce",
        code: "LETCE",
        default_quantity: 20,
    },
];

/// Finds a catalogue entry by code or by name, ignoring case.
pub fn lookup(name_or_code: &str) -> Result<&'static Product, Error> {
    CATALOGUE
        .iter()
        .find(|product| {
            product.code.eq_ignore_ascii_case(name_or_code)
                || product.name.eq_ignore_ascii_case(name_or_code)
        })
        .ok_or_else(|| Error::UnknownProduct(name_or_code.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupplyCommand {
    pub code: ProductCode,
    pub quantity: NonZeroU8,
}

impl SupplyCommand {
    pub fn new(code: &str, quantity: u32) -> Result<Self, Error> {
        let code = ProductCode::parse(code)?;
        let quantity = u8::try_from(quantity)
            .ok()
            .and_then(NonZeroU8::new)
            .ok_or(Error::InvalidQuantity(quantity))?;
        Ok(Self { code, quantity })
    }

    pub fn for_product(product: &Product, quantity: Option<u32>) -> Result<Self, Error> {
        Self::new(
            product.code,
            quantity.unwrap_or(product.default_quantity as u32),
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}{}\n", self.code, self.quantity).into_bytes()
    }
}

pub fn write_command(output: &mut impl Write, command: &SupplyCommand) -> std::io::Result<()> {
    output.write_all(&command.encode())?;
    output.flush()
}

/// Opens `port`, writes the command and closes the port again.
pub fn send(port: &str, baud_rate: u32, command: &SupplyCommand) -> Result<(), Error> {
    let mut serial = serialport::new(port, baud_rate)
        .timeout(WRITE_TIMEOUT)
        .open()
        .map_err(|err| Error::Port(format!("{}: {}", port, err)))?;
    write_command(&mut serial, command).map_err(|err| Error::Port(err.to_string()))?;
    info!(
        "[{}] Sent: {} {}",
        Local::now().format("%H:%M:%S"),
        command.code,
        command.quantity
    );
    Ok(())
}
