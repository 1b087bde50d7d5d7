//! Fleet database handle.

fleet_core::define_database!(FleetDatabase, "Fleet database migrations complete");
