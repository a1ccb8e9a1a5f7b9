#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = gar_importer::rocket();
    log::info!("starting GAR import server");
    rocket
}
