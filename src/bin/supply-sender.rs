use anyhow::anyhow;
use clap::Parser;
use log::error;
use traffic_frontend::{
    args::SenderArgs,
    line_source::available_ports,
    supply::{lookup, send, SupplyCommand, CATALOGUE},
};

fn serial_port_path(explicit: Option<String>) -> Option<String> {
    if explicit.is_some() {
        return explicit;
    }
    let ports = available_ports();
    if ports.len() == 1 {
        ports.into_iter().next()
    } else {
        None
    }
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_env()?;
    let args = SenderArgs::parse();

    if args.list_products {
        for product in CATALOGUE.iter() {
            println!(
                "{} {:<16} {}",
                product.code, product.name, product.default_quantity
            );
        }
        return Ok(());
    }
    if args.list_ports {
        for port in available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let port = serial_port_path(args.port.clone())
        .ok_or_else(|| anyhow!("Select a serial port with --port"))?;
    let product = args
        .product
        .as_deref()
        .ok_or_else(|| anyhow!("Select a product with --product"))?;
    let command = match lookup(product) {
        Ok(entry) => SupplyCommand::for_product(entry, args.quantity)?,
        // codes outside the catalogue are fine as long as the order is explicit
        Err(_) => SupplyCommand::new(
            product,
            args.quantity
                .ok_or_else(|| anyhow!("{} is not in the catalogue, pass --quantity", product))?,
        )?,
    };
    if let Err(err) = send(&port, args.baud, &command) {
        error!("Sending {} {} failed: {}", command.code, command.quantity, err);
        return Err(err.into());
    }
    Ok(())
}
