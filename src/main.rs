use color_eyre::Result;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toilet_radar::{
    api::{SupabaseBackend, ToiletBackend},
    app::{Action, App},
    config::Config,
    events::{Event, EventHandler},
    fetch::{FetchController, FetchSettings},
    geocoding::Geocoder,
    location::{
        gps::{Gpsd, NoDevice, PositionProvider},
        ip::IpLocator,
        LocationManager, LocationSettings,
    },
    logging,
    route::RouteFinder,
    ui,
};
use tracing::{error, info};

/// Long-lived collaborators that actions are handed to.
struct Services {
    fetcher: FetchController,
    routes: Arc<RouteFinder>,
    geocoder: Arc<Geocoder>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Instrumentation and safety
    let _log_guard = logging::initialize_logging("logs");
    color_eyre::install()?;
    // After color-eyre so its report hook runs once the terminal is restored
    install_panic_hook();

    let config = Config::load();
    info!("Backend at {}", config.backend.url);

    let backend: Arc<dyn ToiletBackend> = Arc::new(SupabaseBackend::new(&config.backend)?);
    let gps: Arc<dyn PositionProvider> = if config.location.gps_enabled {
        Arc::new(Gpsd::new(config.location.gpsd_address.clone()))
    } else {
        Arc::new(NoDevice)
    };
    let ip = Arc::new(IpLocator::new(Duration::from_millis(config.location.ip_timeout_ms))?);

    let mut app = App::new(&config);
    let events = EventHandler::new(config.ui.tick_rate_ms);

    let services = Services {
        fetcher: FetchController::spawn(
            Arc::clone(&backend),
            FetchSettings::from_config(&config.backend),
            app.viewport,
        ),
        routes: Arc::new(RouteFinder::new(backend, &config.route, &config.backend)),
        geocoder: Arc::new(Geocoder::new()?),
    };

    // Location callbacks only forward into the event loop
    let update_tx = events.tx.clone();
    let warning_tx = events.tx.clone();
    let location = LocationManager::new(gps, ip, LocationSettings::from_config(&config.location)).start(
        move |update| {
            let _ = update_tx.send(Event::Location(update));
        },
        move |message| {
            let _ = warning_tx.send(Event::LocationWarning(message));
        },
    );

    let mut terminal = setup_terminal()?;
    let outcome = run(&mut terminal, &mut app, events, &services).await;
    restore_terminal(terminal)?;

    location.shutdown().await;
    services.fetcher.shutdown().await;
    info!("Shut down cleanly.");
    outcome
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut events: EventHandler,
    services: &Services,
) -> Result<()> {
    let mut toilets = services.fetcher.subscribe();

    while !app.should_quit {
        if toilets.has_changed().unwrap_or(false) {
            app.on_fetch(toilets.borrow_and_update().clone());
        }
        terminal.draw(|f| ui::render(f, app))?;

        let Some(event) = events.next().await else {
            break;
        };
        let action = match event {
            Event::Tick => {
                app.on_tick(Instant::now());
                None
            }
            Event::Input(key) => app.handle_key(key),
            Event::Location(update) => {
                services.fetcher.location_changed(update.estimate);
                app.on_location(update)
            }
            Event::LocationWarning(message) => {
                app.on_location_warning(message);
                None
            }
            Event::Route(result) => {
                app.on_route(result);
                None
            }
            Event::SearchResults(results) => {
                app.on_search_results(results);
                None
            }
        };

        if let Some(action) = action {
            dispatch(action, services, &events);
        }
    }
    Ok(())
}

fn dispatch(action: Action, services: &Services, events: &EventHandler) {
    match action {
        Action::Viewport(viewport) => services.fetcher.viewport_changed(viewport),
        Action::Refresh => services.fetcher.refresh(),
        Action::FindRoute(origin) => {
            let routes = Arc::clone(&services.routes);
            let tx = events.tx.clone();
            tokio::spawn(async move {
                let result = routes.find(origin).await.map_err(|e| {
                    error!("Route lookup failed: {:?}", e);
                    e.to_string()
                });
                let _ = tx.send(Event::Route(result));
            });
        }
        Action::Search(query) => {
            let geocoder = Arc::clone(&services.geocoder);
            let tx = events.tx.clone();
            tokio::spawn(async move {
                let results = geocoder.search(&query).await;
                let _ = tx.send(Event::SearchResults(results));
            });
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen, crossterm::cursor::Hide)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), crossterm::terminal::LeaveAlternateScreen, crossterm::cursor::Show)?;
    Ok(())
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Force terminal cleanup!
        crossterm::terminal::disable_raw_mode().ok();
        crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen, crossterm::cursor::Show).ok();
        original_hook(panic_info);
    }));
}
